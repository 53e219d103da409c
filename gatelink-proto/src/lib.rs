//! Gatelink wire protocol - slots, key records and management codes
//!
//! Everything here is plain data: no I/O, no async, no cryptography. The
//! controller crate drives these over a BLE link.

pub mod audit;
pub mod key_record;
pub mod management;
pub mod slots;

pub use audit::{AUDIT_ENTRY_LEN, AuditEntry, AuditEntryError};
pub use key_record::{FLAG_ADMIN, KEY_RECORD_LEN, KeyRecord, KeyRecordError, KeyType};
pub use management::{
    Action, NAME_LEN, ParamId, Permissions, Status, commands, decode_name, decode_u16, decode_u32,
    encode_name,
};
pub use slots::{SERVICE_UUID, Slot, SlotCapabilities, SlotGroup};

/// Length of both handshake nonces
pub const NONCE_LEN: usize = 32;

/// Length of a raw `r || s` P-256 signature
pub const SIGNATURE_LEN: usize = 64;

/// Length of a SEC1 compressed P-256 public key
pub const COMPRESSED_KEY_LEN: usize = 33;
