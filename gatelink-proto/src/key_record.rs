//! 33-byte key records
//!
//! Byte 0 carries flags: bit 7 is the admin privilege, bits 0-1 the key type.
//! Bytes 1..33 hold the key material. For secp256r1 the type code doubles as
//! the SEC1 compression prefix, so a record is the compressed point with the
//! privilege bits folded into the prefix byte.

use std::fmt;

pub const KEY_RECORD_LEN: usize = 33;

/// Admin privilege bit in the flags byte
pub const FLAG_ADMIN: u8 = 0x80;

/// Key type bits in the flags byte
pub const TYPE_MASK: u8 = 0x03;

pub const TYPE_ED25519: u8 = 0x01;
pub const TYPE_SECP256R1_EVEN: u8 = 0x02;
pub const TYPE_SECP256R1_ODD: u8 = 0x03;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyRecordError {
    #[error("key record must be {KEY_RECORD_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("key type code 0x00 is reserved")]
    ReservedType,
    #[error("not a compressed secp256r1 point (prefix 0x{0:02x})")]
    NotCompressedPoint(u8),
}

/// Kind of public key held in a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Raw 32-byte Ed25519 public key
    Ed25519,
    /// X coordinate of a P-256 point; `y_odd` is the compression parity
    Secp256r1 { y_odd: bool },
}

impl KeyType {
    pub fn code(&self) -> u8 {
        match self {
            KeyType::Ed25519 => TYPE_ED25519,
            KeyType::Secp256r1 { y_odd: false } => TYPE_SECP256R1_EVEN,
            KeyType::Secp256r1 { y_odd: true } => TYPE_SECP256R1_ODD,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code & TYPE_MASK {
            TYPE_ED25519 => Some(KeyType::Ed25519),
            TYPE_SECP256R1_EVEN => Some(KeyType::Secp256r1 { y_odd: false }),
            TYPE_SECP256R1_ODD => Some(KeyType::Secp256r1 { y_odd: true }),
            _ => None,
        }
    }

    pub fn is_secp256r1(&self) -> bool {
        matches!(self, KeyType::Secp256r1 { .. })
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Ed25519 => f.write_str("ed25519"),
            KeyType::Secp256r1 { .. } => f.write_str("secp256r1"),
        }
    }
}

/// A key record as stored on the device, kept verbatim
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRecord {
    bytes: [u8; KEY_RECORD_LEN],
}

impl KeyRecord {
    pub fn new(key_type: KeyType, admin: bool, material: [u8; 32]) -> Self {
        let mut bytes = [0u8; KEY_RECORD_LEN];
        bytes[0] = key_type.code() | if admin { FLAG_ADMIN } else { 0 };
        bytes[1..].copy_from_slice(&material);
        Self { bytes }
    }

    pub fn ed25519(public_key: [u8; 32], admin: bool) -> Self {
        Self::new(KeyType::Ed25519, admin, public_key)
    }

    /// Build a record from a SEC1 compressed P-256 point
    pub fn from_compressed_point(point: &[u8; 33], admin: bool) -> Result<Self, KeyRecordError> {
        let y_odd = match point[0] {
            TYPE_SECP256R1_EVEN => false,
            TYPE_SECP256R1_ODD => true,
            other => return Err(KeyRecordError::NotCompressedPoint(other)),
        };
        let mut material = [0u8; 32];
        material.copy_from_slice(&point[1..]);
        Ok(Self::new(KeyType::Secp256r1 { y_odd }, admin, material))
    }

    pub fn decode(data: &[u8]) -> Result<Self, KeyRecordError> {
        let bytes: [u8; KEY_RECORD_LEN] = data
            .try_into()
            .map_err(|_| KeyRecordError::WrongLength(data.len()))?;
        if bytes[0] & TYPE_MASK == 0 {
            return Err(KeyRecordError::ReservedType);
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_RECORD_LEN] {
        &self.bytes
    }

    pub fn to_bytes(&self) -> [u8; KEY_RECORD_LEN] {
        self.bytes
    }

    pub fn flags(&self) -> u8 {
        self.bytes[0]
    }

    pub fn key_type(&self) -> KeyType {
        // decode() and the constructors never admit type code 0
        KeyType::from_code(self.bytes[0]).unwrap_or(KeyType::Ed25519)
    }

    pub fn is_admin(&self) -> bool {
        self.bytes[0] & FLAG_ADMIN != 0
    }

    pub fn material(&self) -> &[u8; 32] {
        self.bytes[1..]
            .try_into()
            .unwrap_or_else(|_| unreachable!("record material is 32 bytes"))
    }

    /// The SEC1 compressed point for secp256r1 records
    pub fn compressed_point(&self) -> Option<[u8; 33]> {
        if !self.key_type().is_secp256r1() {
            return None;
        }
        let mut point = self.bytes;
        point[0] &= TYPE_MASK;
        Some(point)
    }

    /// Same key, regardless of privilege bits
    pub fn same_key(&self, other: &KeyRecord) -> bool {
        self.key_type() == other.key_type() && self.material() == other.material()
    }
}

impl TryFrom<&[u8]> for KeyRecord {
    type Error = KeyRecordError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Self::decode(data)
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("type", &self.key_type())
            .field("admin", &self.is_admin())
            .field("flags", &format_args!("0x{:02x}", self.flags()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(byte0: u8) -> Vec<u8> {
        let mut data = vec![0xAB; KEY_RECORD_LEN];
        data[0] = byte0;
        data
    }

    #[test]
    fn decode_admin_ed25519() {
        let rec = KeyRecord::decode(&record(0x81)).unwrap();
        assert_eq!(rec.key_type(), KeyType::Ed25519);
        assert!(rec.is_admin());
        assert_eq!(rec.material(), &[0xAB; 32]);
    }

    #[test]
    fn decode_plain_secp256r1() {
        let rec = KeyRecord::decode(&record(0x02)).unwrap();
        assert_eq!(rec.key_type(), KeyType::Secp256r1 { y_odd: false });
        assert!(!rec.is_admin());
    }

    #[test]
    fn decode_rejects_wrong_length_and_reserved_type() {
        assert_eq!(KeyRecord::decode(&[0x01; 32]), Err(KeyRecordError::WrongLength(32)));
        assert_eq!(KeyRecord::decode(&[0x01; 34]), Err(KeyRecordError::WrongLength(34)));
        assert_eq!(KeyRecord::decode(&record(0x80)), Err(KeyRecordError::ReservedType));
        assert_eq!(KeyRecord::decode(&record(0x00)), Err(KeyRecordError::ReservedType));
    }

    #[test]
    fn flags_survive_verbatim() {
        let rec = KeyRecord::decode(&record(0xC3)).unwrap();
        assert_eq!(rec.flags(), 0xC3);
        assert_eq!(rec.as_bytes().as_slice(), record(0xC3).as_slice());
        assert_eq!(rec.compressed_point().unwrap()[0], 0x03);
    }

    #[test]
    fn compressed_point_round_trip() {
        let mut point = [0x11u8; 33];
        point[0] = 0x03;
        let rec = KeyRecord::from_compressed_point(&point, true).unwrap();
        assert_eq!(rec.flags(), 0x83);
        assert_eq!(rec.compressed_point(), Some(point));

        point[0] = 0x04;
        assert_eq!(
            KeyRecord::from_compressed_point(&point, false),
            Err(KeyRecordError::NotCompressedPoint(0x04))
        );
    }

    #[test]
    fn same_key_ignores_privilege() {
        let a = KeyRecord::ed25519([7; 32], true);
        let b = KeyRecord::ed25519([7; 32], false);
        assert!(a.same_key(&b));
        assert_ne!(a, b);
        assert!(!a.same_key(&KeyRecord::new(KeyType::Secp256r1 { y_odd: true }, true, [7; 32])));
    }
}
