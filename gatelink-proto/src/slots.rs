//! GATT slot table for the gate service
//!
//! Every value the client exchanges with a gate controller lives in one of
//! these slots. The engine addresses slots by [`Slot`]; transports map a slot
//! to whatever handle their BLE stack uses (see [`Slot::short_id`]).

use std::fmt;

/// Gate service UUID
pub const SERVICE_UUID: &str = "6a7e6a7e-4929-42d0-0000-fcc5a35e13f1";

/// Bluetooth base UUID used to expand the 16-bit characteristic ids
pub const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Which part of the protocol a slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotGroup {
    /// Challenge-response handshake
    Auth,
    /// Admin command protocol
    Management,
    /// Authentication audit log kept by the peer
    AuditLog,
}

/// Operations a slot supports on the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotCapabilities {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl SlotCapabilities {
    const fn new(read: bool, write: bool, write_without_response: bool, notify: bool) -> Self {
        Self { read, write, write_without_response, notify }
    }
}

/// A named value endpoint on the gate controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Action,
    ClientPubkey,
    ClientKeyAck,
    Perm,
    Nonce,
    ClientNonce,
    Authenticate,
    AuthenticateAck,
    Management,
    ManagementKey,
    ManagementParamId,
    ManagementParamVal,
    ManagementName,
    ManagementResult,
    LogIndex,
    LogEntry,
    LogCount,
}

impl Slot {
    pub const ALL: [Slot; 17] = [
        Slot::Action,
        Slot::ClientPubkey,
        Slot::ClientKeyAck,
        Slot::Perm,
        Slot::Nonce,
        Slot::ClientNonce,
        Slot::Authenticate,
        Slot::AuthenticateAck,
        Slot::Management,
        Slot::ManagementKey,
        Slot::ManagementParamId,
        Slot::ManagementParamVal,
        Slot::ManagementName,
        Slot::ManagementResult,
        Slot::LogIndex,
        Slot::LogEntry,
        Slot::LogCount,
    ];

    /// Logical name, as used in logs and by transports that resolve by name
    pub fn name(&self) -> &'static str {
        match self {
            Slot::Action => "action",
            Slot::ClientPubkey => "client_pubkey",
            Slot::ClientKeyAck => "client_key_ack",
            Slot::Perm => "perm",
            Slot::Nonce => "nonce",
            Slot::ClientNonce => "client_nonce",
            Slot::Authenticate => "authenticate",
            Slot::AuthenticateAck => "authenticate_ack",
            Slot::Management => "management",
            Slot::ManagementKey => "management_key",
            Slot::ManagementParamId => "management_param_id",
            Slot::ManagementParamVal => "management_param_val",
            Slot::ManagementName => "management_name",
            Slot::ManagementResult => "management_result",
            Slot::LogIndex => "log_index",
            Slot::LogEntry => "log_entry",
            Slot::LogCount => "log_count",
        }
    }

    pub fn from_name(name: &str) -> Option<Slot> {
        Slot::ALL.into_iter().find(|s| s.name() == name)
    }

    /// 16-bit characteristic id, expanded on the Bluetooth base UUID
    pub fn short_id(&self) -> u16 {
        match self {
            Slot::Nonce => 0x0100,
            Slot::Authenticate => 0x0101,
            Slot::ClientPubkey => 0x0102,
            Slot::ClientNonce => 0x0103,
            Slot::ClientKeyAck => 0x0104,
            Slot::AuthenticateAck => 0x0105,
            Slot::Action => 0x0106,
            Slot::Perm => 0x0108,
            Slot::Management => 0x1100,
            Slot::ManagementKey => 0x1101,
            Slot::ManagementParamId => 0x1102,
            Slot::ManagementParamVal => 0x1103,
            Slot::ManagementName => 0x1104,
            Slot::ManagementResult => 0x1105,
            Slot::LogIndex => 0x1200,
            Slot::LogEntry => 0x1201,
            Slot::LogCount => 0x1202,
        }
    }

    pub fn from_short_id(id: u16) -> Option<Slot> {
        Slot::ALL.into_iter().find(|s| s.short_id() == id)
    }

    /// Full characteristic UUID string
    pub fn uuid(&self) -> String {
        format!("0000{:04x}{}", self.short_id(), BASE_UUID_SUFFIX)
    }

    pub fn group(&self) -> SlotGroup {
        match self {
            Slot::Action
            | Slot::ClientPubkey
            | Slot::ClientKeyAck
            | Slot::Perm
            | Slot::Nonce
            | Slot::ClientNonce
            | Slot::Authenticate
            | Slot::AuthenticateAck => SlotGroup::Auth,
            Slot::Management
            | Slot::ManagementKey
            | Slot::ManagementParamId
            | Slot::ManagementParamVal
            | Slot::ManagementName
            | Slot::ManagementResult => SlotGroup::Management,
            Slot::LogIndex | Slot::LogEntry | Slot::LogCount => SlotGroup::AuditLog,
        }
    }

    /// What the peer firmware declares for this characteristic
    pub fn capabilities(&self) -> SlotCapabilities {
        match self {
            Slot::Nonce | Slot::Perm | Slot::LogEntry | Slot::LogCount => {
                SlotCapabilities::new(true, false, false, false)
            }
            Slot::Authenticate => SlotCapabilities::new(false, true, true, false),
            Slot::ClientNonce | Slot::Management => SlotCapabilities::new(false, true, false, false),
            Slot::ClientKeyAck | Slot::AuthenticateAck | Slot::ManagementResult => {
                SlotCapabilities::new(true, false, false, true)
            }
            Slot::ClientPubkey
            | Slot::Action
            | Slot::ManagementKey
            | Slot::ManagementParamId
            | Slot::ManagementParamVal
            | Slot::ManagementName
            | Slot::LogIndex => SlotCapabilities::new(true, true, false, false),
        }
    }

    /// Exact size of the value, when the slot has a fixed size
    pub fn size(&self) -> usize {
        match self {
            Slot::Action => 2,
            Slot::ClientPubkey => 33,
            Slot::ClientKeyAck | Slot::Perm | Slot::AuthenticateAck => 1,
            Slot::Nonce | Slot::ClientNonce => 32,
            Slot::Authenticate => 64,
            Slot::Management | Slot::ManagementParamId | Slot::ManagementResult => 1,
            Slot::ManagementKey => 33,
            Slot::ManagementParamVal => 4,
            Slot::ManagementName => 64,
            Slot::LogIndex | Slot::LogCount => 2,
            Slot::LogEntry => crate::audit::AUDIT_ENTRY_LEN,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_ids_are_unique() {
        for (i, a) in Slot::ALL.iter().enumerate() {
            for b in &Slot::ALL[i + 1..] {
                assert_ne!(a.name(), b.name());
                assert_ne!(a.short_id(), b.short_id());
            }
            assert_eq!(Slot::from_name(a.name()), Some(*a));
            assert_eq!(Slot::from_short_id(a.short_id()), Some(*a));
        }
        assert_eq!(Slot::from_name("bogus"), None);
    }

    #[test]
    fn group_sizes() {
        let count = |g| Slot::ALL.iter().filter(|s| s.group() == g).count();
        assert_eq!(count(SlotGroup::Auth), 8);
        assert_eq!(count(SlotGroup::Management), 6);
        assert_eq!(count(SlotGroup::AuditLog), 3);
    }

    #[test]
    fn uuid_expansion() {
        assert_eq!(Slot::Nonce.uuid(), "00000100-0000-1000-8000-00805f9b34fb");
        assert_eq!(Slot::ManagementResult.uuid(), "00001105-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn only_authenticate_takes_unacknowledged_writes() {
        let unacked: Vec<_> = Slot::ALL
            .iter()
            .filter(|s| s.capabilities().write_without_response)
            .collect();
        assert_eq!(unacked, vec![&Slot::Authenticate]);
    }
}
