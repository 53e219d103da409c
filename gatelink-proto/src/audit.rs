//! Authentication audit log entries
//!
//! The gate keeps a ring of recent authentication attempts. An entry is
//! selected by writing its index (0 = newest) to `log_index` and reading
//! `log_entry`.

use crate::key_record::KEY_RECORD_LEN;

pub const AUDIT_ENTRY_LEN: usize = 50;

const FLAG_VALID: u8 = 0x01;
const FLAG_SUCCESS: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditEntryError {
    #[error("audit entry must be {AUDIT_ENTRY_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("no audit entry at this index")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub success: bool,
    /// The key the client presented, as written to `client_pubkey`
    pub presented_key: [u8; KEY_RECORD_LEN],
    /// Peer uptime when the attempt happened
    pub uptime_ms: u64,
    pub address: [u8; 6],
    pub action: u16,
}

impl AuditEntry {
    pub fn from_bytes(data: &[u8]) -> Result<Self, AuditEntryError> {
        let data: &[u8; AUDIT_ENTRY_LEN] = data
            .try_into()
            .map_err(|_| AuditEntryError::WrongLength(data.len()))?;
        if data[0] & FLAG_VALID == 0 {
            return Err(AuditEntryError::Empty);
        }

        let mut presented_key = [0u8; KEY_RECORD_LEN];
        presented_key.copy_from_slice(&data[1..34]);
        let mut uptime = [0u8; 8];
        uptime.copy_from_slice(&data[34..42]);
        let mut address = [0u8; 6];
        address.copy_from_slice(&data[42..48]);

        Ok(Self {
            success: data[0] & FLAG_SUCCESS != 0,
            presented_key,
            uptime_ms: u64::from_le_bytes(uptime),
            address,
            action: u16::from_le_bytes([data[48], data[49]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; AUDIT_ENTRY_LEN] {
        let mut out = [0u8; AUDIT_ENTRY_LEN];
        out[0] = FLAG_VALID | if self.success { FLAG_SUCCESS } else { 0 };
        out[1..34].copy_from_slice(&self.presented_key);
        out[34..42].copy_from_slice(&self.uptime_ms.to_le_bytes());
        out[42..48].copy_from_slice(&self.address);
        out[48..50].copy_from_slice(&self.action.to_le_bytes());
        out
    }

    /// Address in the usual colon-separated form, most significant byte first
    pub fn address_string(&self) -> String {
        self.address
            .iter()
            .rev()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}
