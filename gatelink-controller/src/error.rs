//! Error kinds shared by the key store, handshake and management client

use gatelink_proto::{Slot, Status};

/// Slot missing or link failure. Always ends the current sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("slot {0} not found on device")]
    SlotNotFound(Slot),
    #[error("slot {slot} does not support {op}")]
    Unsupported { slot: Slot, op: &'static str },
    #[error("link failure: {0}")]
    Link(String),
    #[error("operation timed out")]
    Timeout,
    #[error("device disconnected")]
    Disconnected,
}

/// The peer refused the handshake or sent something unusable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("device does not know this key")]
    KeyNotAuthorized,
    #[error("device rejected the signature")]
    AuthenticationFailed,
    #[error("invalid data in {slot}: {detail}")]
    InvalidData { slot: Slot, detail: String },
    #[error("session is not connected")]
    NotConnected,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("malformed DER signature: {0}")]
    SignatureDecode(&'static str),
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),
}

/// Status reported by the device for a management command, or raised
/// locally before any round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ManagementError {
    #[error("session is not an admin session")]
    NotAdmin,
    #[error("device failed to write flash")]
    FlashError,
    #[error("not found")]
    NotFound,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("unknown management status 0x{0:02x}")]
    Unknown(u8),
}

impl ManagementError {
    /// `None` for [`Status::Ok`]
    pub fn from_status(status: Status) -> Option<Self> {
        match status {
            Status::Ok => None,
            Status::NotAdmin => Some(ManagementError::NotAdmin),
            Status::FlashError => Some(ManagementError::FlashError),
            Status::NotFound => Some(ManagementError::NotFound),
            Status::InvalidOperation => Some(ManagementError::InvalidOperation),
            Status::Unknown(code) => Some(ManagementError::Unknown(code)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("failed to access key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid signing key: {0}")]
    Parse(String),
    #[error("secure store error: {0}")]
    Keyring(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no home directory, set GATELINK_HOME")]
    NoHome,
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Management(#[from] ManagementError),
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    pub fn management(&self) -> Option<ManagementError> {
        match self {
            Error::Management(e) => Some(*e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
