//! Action codes, permission bits and management wire codes

use std::fmt;

/// Size of the NUL-padded device name slot
pub const NAME_LEN: usize = 64;

/// Management command bytes, written to the `management` slot
pub mod commands {
    /// Add the key record in `management_key`
    pub const ADD_KEY: u8 = 0x01;

    /// Delete the key record in `management_key`
    pub const DELETE_KEY: u8 = 0x02;

    /// Load the key at the index in `management_param_val`; the peer
    /// overwrites `management_param_val` with the total key count
    pub const GET_KEY: u8 = 0x03;

    /// Store `management_param_val` under `management_param_id`
    pub const SET_PARAM: u8 = 0x10;

    /// Load the parameter `management_param_id` into `management_param_val`
    pub const GET_PARAM: u8 = 0x11;

    /// Store the name in `management_name`
    pub const SET_NAME: u8 = 0x20;
}

/// Status byte read from `management_result`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotAdmin,
    FlashError,
    NotFound,
    InvalidOperation,
    Unknown(u8),
}

impl Status {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => Status::Ok,
            0x01 => Status::NotAdmin,
            0x02 => Status::FlashError,
            0x03 => Status::NotFound,
            0x04 => Status::InvalidOperation,
            other => Status::Unknown(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            Status::Ok => 0x00,
            Status::NotAdmin => 0x01,
            Status::FlashError => 0x02,
            Status::NotFound => 0x03,
            Status::InvalidOperation => 0x04,
            Status::Unknown(b) => *b,
        }
    }
}

/// What the gate should do once the handshake succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Open,
    OpenAndHold,
    Close,
    AdminMode,
}

impl Action {
    pub fn code(&self) -> u16 {
        match self {
            Action::Open => 1,
            Action::OpenAndHold => 2,
            Action::Close => 3,
            Action::AdminMode => 128,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Action::Open),
            2 => Some(Action::OpenAndHold),
            3 => Some(Action::Close),
            128 => Some(Action::AdminMode),
            _ => None,
        }
    }

    /// Little-endian value for the `action` slot
    pub fn to_bytes(&self) -> [u8; 2] {
        self.code().to_le_bytes()
    }
}

/// Permission byte read from the `perm` slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(pub u8);

impl Permissions {
    /// May run management commands
    pub const ADMIN: u8 = 0x80;
    /// May add or delete other admin keys
    pub const ADMIN_ADMIN: u8 = 0x40;
    /// May change device parameters
    pub const SET_ADMIN: u8 = 0x20;

    pub fn is_admin(&self) -> bool {
        self.0 & Self::ADMIN != 0
    }

    pub fn can_manage_admins(&self) -> bool {
        self.0 & Self::ADMIN_ADMIN != 0
    }

    pub fn can_set_params(&self) -> bool {
        self.0 & Self::SET_ADMIN != 0
    }
}

/// Identifier of a device parameter slot
///
/// The protocol treats the id as opaque; only 0..=254 are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u8);

impl ParamId {
    pub const OPEN_DURATION: ParamId = ParamId(0);
    pub const CLOSE_DELAY: ParamId = ParamId(1);
    pub const LAMP_DURATION: ParamId = ParamId(2);
    pub const ADVERTISEMENT_INTERVAL: ParamId = ParamId(3);
    pub const OBSTACLE_TIMEOUT: ParamId = ParamId(4);

    pub const WELL_KNOWN: [(ParamId, &'static str); 5] = [
        (ParamId::OPEN_DURATION, "open-duration"),
        (ParamId::CLOSE_DELAY, "close-delay"),
        (ParamId::LAMP_DURATION, "lamp-duration"),
        (ParamId::ADVERTISEMENT_INTERVAL, "advertisement-interval"),
        (ParamId::OBSTACLE_TIMEOUT, "obstacle-timeout"),
    ];

    /// `None` for 255, which is outside the protocol's range
    pub fn new(id: u8) -> Option<Self> {
        (id != u8::MAX).then_some(ParamId(id))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Accepts a well-known name or a number
    pub fn parse(s: &str) -> Option<Self> {
        if let Some((id, _)) = Self::WELL_KNOWN.iter().find(|(_, name)| *name == s) {
            return Some(*id);
        }
        s.parse::<u8>().ok().and_then(ParamId::new)
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::WELL_KNOWN.iter().find(|(id, _)| id == self) {
            Some((_, name)) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Encode a device name: UTF-8, NUL-terminated, zero-padded to 64 bytes
///
/// Names that do not fit with their terminator are cut at the last
/// character boundary that does.
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut end = name.len().min(NAME_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let mut buf = [0u8; NAME_LEN];
    buf[..end].copy_from_slice(&name.as_bytes()[..end]);
    buf
}

/// Decode a name slot value up to the first NUL
pub fn decode_name(data: &[u8]) -> String {
    let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..len]).into_owned()
}

/// Read a little-endian u32, as carried by `management_param_val`
pub fn decode_u32(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Read a little-endian u16, as carried by the audit log slots
pub fn decode_u16(data: &[u8]) -> Option<u16> {
    let bytes: [u8; 2] = data.try_into().ok()?;
    Some(u16::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(Status::from_byte(0), Status::Ok);
        assert_eq!(Status::from_byte(1), Status::NotAdmin);
        assert_eq!(Status::from_byte(2), Status::FlashError);
        assert_eq!(Status::from_byte(3), Status::NotFound);
        assert_eq!(Status::from_byte(4), Status::InvalidOperation);
        assert_eq!(Status::from_byte(0x42), Status::Unknown(0x42));
        assert_eq!(Status::Unknown(0x42).to_byte(), 0x42);
    }

    #[test]
    fn action_codes_are_little_endian() {
        assert_eq!(Action::Open.to_bytes(), [1, 0]);
        assert_eq!(Action::AdminMode.to_bytes(), [0x80, 0]);
        assert_eq!(Action::from_code(2), Some(Action::OpenAndHold));
        assert_eq!(Action::from_code(4), None);
    }

    #[test]
    fn permissions() {
        let p = Permissions(0x80);
        assert!(p.is_admin());
        assert!(!p.can_manage_admins());
        assert!(!Permissions(0x7f).is_admin());
        assert!(Permissions(0xE0).can_set_params());
    }

    #[test]
    fn param_ids() {
        assert_eq!(ParamId::new(255), None);
        assert_eq!(ParamId::new(254).map(|p| p.get()), Some(254));
        assert_eq!(ParamId::parse("close-delay"), Some(ParamId::CLOSE_DELAY));
        assert_eq!(ParamId::parse("17").map(|p| p.get()), Some(17));
        assert_eq!(ParamId::parse("255"), None);
        assert_eq!(ParamId::OBSTACLE_TIMEOUT.to_string(), "obstacle-timeout");
        assert_eq!(ParamId::parse("9").unwrap().to_string(), "9");
    }

    #[test]
    fn name_is_padded_and_terminated() {
        let buf = encode_name("Gate");
        assert_eq!(&buf[..4], b"Gate");
        assert!(buf[4..].iter().all(|&b| b == 0));
        assert_eq!(decode_name(&buf), "Gate");
    }

    #[test]
    fn long_name_is_truncated_on_char_boundary() {
        let ascii = "x".repeat(100);
        let buf = encode_name(&ascii);
        assert_eq!(buf[63], 0);
        assert_eq!(decode_name(&buf).len(), 63);

        // 21 three-byte characters = 63 bytes fit, the 22nd does not
        let wide = "€".repeat(22);
        let buf = encode_name(&wide);
        assert_eq!(decode_name(&buf), "€".repeat(21));

        // 2-byte chars: 31 * 2 = 62 fits, 32nd would end at 64
        let buf = encode_name(&"é".repeat(40));
        assert_eq!(decode_name(&buf), "é".repeat(31));
    }

    #[test]
    fn decode_name_without_terminator() {
        assert_eq!(decode_name(b"abc"), "abc");
        assert_eq!(decode_name(&[]), "");
    }

    #[test]
    fn integers() {
        assert_eq!(decode_u32(&[3, 0, 0, 0]), Some(3));
        assert_eq!(decode_u32(&[3, 0, 0]), None);
        assert_eq!(decode_u16(&[0x34, 0x12]), Some(0x1234));
    }
}
