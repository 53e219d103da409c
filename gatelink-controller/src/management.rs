//! Admin command protocol
//!
//! A command writes its payload slots, writes the command byte to the
//! `management` trigger and reads the one-byte status from
//! `management_result`. Everything here needs an admin session, checked
//! locally before any slot is touched.

use data_encoding::HEXLOWER;
use gatelink_proto::{
    AuditEntry, AuditEntryError, KeyRecord, ParamId, Slot, Status, commands, decode_name, decode_u16, decode_u32,
    encode_name,
};

use crate::error::{CryptoError, Error, ManagementError, ProtocolError, Result};
use crate::session::AuthSession;
use crate::transport::{SlotLink, SlotTransport};

/// Most keys enumeration will read, whatever count the device reports
pub const MAX_KEY_COUNT: u32 = 1024;

/// Consecutive missing indices after which enumeration gives up
const MISSING_RUN_LIMIT: u32 = 4;

/// One key read back from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEntry {
    pub index: u32,
    pub record: KeyRecord,
    /// Key count the device reported alongside this record
    pub total: u32,
}

/// An index that could not be read during enumeration
#[derive(Debug)]
pub struct KeyFailure {
    pub index: u32,
    pub error: Error,
}

/// All keys the device would hand out
///
/// Enumeration carries on past a failing index; `first_error` then holds
/// the earliest failure and `keys` everything else.
#[derive(Debug, Default)]
pub struct KeyListing {
    pub total: u32,
    pub keys: Vec<KeyEntry>,
    pub first_error: Option<KeyFailure>,
}

impl KeyListing {
    pub fn is_complete(&self) -> bool {
        self.first_error.is_none()
    }

    pub fn records(&self) -> impl Iterator<Item = &KeyRecord> {
        self.keys.iter().map(|k| &k.record)
    }
}

/// Management commands over an authenticated admin session
pub struct ManagementClient<'s, T: SlotTransport> {
    session: &'s mut AuthSession<T>,
}

impl<'s, T: SlotTransport> ManagementClient<'s, T> {
    pub fn new(session: &'s mut AuthSession<T>) -> Self {
        Self { session }
    }

    fn require_admin(&self) -> Result<Commands<'_, T>> {
        if !self.session.is_admin() {
            return Err(ManagementError::NotAdmin.into());
        }
        Ok(Commands { link: self.session.link() })
    }

    fn finish<R>(&mut self, result: Result<R>) -> Result<R> {
        self.session.observe(&result);
        result
    }

    pub async fn add_key(&mut self, record: &KeyRecord) -> Result<()> {
        let result = self.require_admin()?.key_command(commands::ADD_KEY, record).await;
        self.finish(result)
    }

    /// Add a record given as raw bytes; anything but 33 well-formed bytes is
    /// rejected without contacting the device
    pub async fn add_key_bytes(&mut self, record: &[u8]) -> Result<()> {
        let cmds = self.require_admin()?;
        let record = parse_record(record)?;
        let result = cmds.key_command(commands::ADD_KEY, &record).await;
        self.finish(result)
    }

    pub async fn delete_key(&mut self, record: &KeyRecord) -> Result<()> {
        let result = self.require_admin()?.key_command(commands::DELETE_KEY, record).await;
        self.finish(result)
    }

    pub async fn delete_key_bytes(&mut self, record: &[u8]) -> Result<()> {
        let cmds = self.require_admin()?;
        let record = parse_record(record)?;
        let result = cmds.key_command(commands::DELETE_KEY, &record).await;
        self.finish(result)
    }

    pub async fn get_key(&mut self, index: u32) -> Result<KeyEntry> {
        let result = self.require_admin()?.get_key(index).await;
        self.finish(result)
    }

    /// Read every key, index 0 up to the count the device reports
    ///
    /// A link failure ends enumeration with an error. Any other failure is
    /// recorded for its index and enumeration continues. At most
    /// [`MAX_KEY_COUNT`] indices are read, and a run of missing keys ends
    /// enumeration early.
    pub async fn list_keys(&mut self) -> Result<KeyListing> {
        let result = self.require_admin()?.list_keys().await;
        self.finish(result)
    }

    pub async fn set_param(&mut self, id: ParamId, value: u32) -> Result<()> {
        let result = self.require_admin()?.set_param(id, value).await;
        self.finish(result)
    }

    pub async fn get_param(&mut self, id: ParamId) -> Result<u32> {
        let result = self.require_admin()?.get_param(id).await;
        self.finish(result)
    }

    /// Names longer than 63 bytes are truncated
    pub async fn set_name(&mut self, name: &str) -> Result<()> {
        let result = self.require_admin()?.set_name(name).await;
        self.finish(result)
    }

    /// Device name; empty when the device has no name slot
    pub async fn name(&mut self) -> Result<String> {
        let result = self.require_admin()?.name().await;
        self.finish(result)
    }

    pub async fn audit_log_count(&mut self) -> Result<u16> {
        let result = self.require_admin()?.audit_log_count().await;
        self.finish(result)
    }

    /// Entry `index`, 0 being the newest
    pub async fn audit_log_entry(&mut self, index: u16) -> Result<AuditEntry> {
        let result = self.require_admin()?.audit_log_entry(index).await;
        self.finish(result)
    }

    /// The whole log, newest first
    pub async fn audit_log(&mut self) -> Result<Vec<AuditEntry>> {
        let result = self.require_admin()?.audit_log().await;
        self.finish(result)
    }
}

fn parse_record(data: &[u8]) -> Result<KeyRecord> {
    KeyRecord::decode(data).map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()).into())
}

fn is_not_found(e: &Error) -> bool {
    e.management() == Some(ManagementError::NotFound)
}

fn invalid(slot: Slot, detail: impl Into<String>) -> Error {
    ProtocolError::InvalidData { slot, detail: detail.into() }.into()
}

/// The slot sequences behind each command, once admin has been checked
struct Commands<'a, T: SlotTransport> {
    link: &'a SlotLink<T>,
}

impl<T: SlotTransport> Commands<'_, T> {
    async fn execute(&self, cmd: u8) -> Result<()> {
        self.link.write(Slot::Management, &[cmd]).await?;
        let result = self.link.read(Slot::ManagementResult).await?;
        let &code = result
            .first()
            .ok_or_else(|| invalid(Slot::ManagementResult, "empty status"))?;

        match ManagementError::from_status(Status::from_byte(code)) {
            None => Ok(()),
            Some(e) => {
                log::warn!("command 0x{cmd:02x}: {e}");
                Err(e.into())
            }
        }
    }

    async fn key_command(&self, cmd: u8, record: &KeyRecord) -> Result<()> {
        log::debug!("command 0x{cmd:02x} for key {}", HEXLOWER.encode(record.as_bytes()));
        self.link.write(Slot::ManagementKey, record.as_bytes()).await?;
        self.execute(cmd).await
    }

    async fn read_u32(&self, slot: Slot) -> Result<u32> {
        let value = self.link.read(slot).await?;
        decode_u32(&value).ok_or_else(|| invalid(slot, format!("expected 4 bytes, got {}", value.len())))
    }

    async fn get_key(&self, index: u32) -> Result<KeyEntry> {
        self.link.write(Slot::ManagementParamVal, &index.to_le_bytes()).await?;
        self.execute(commands::GET_KEY).await?;

        let data = self.link.read(Slot::ManagementKey).await?;
        // the device replaces the index with the key count
        let total = self.read_u32(Slot::ManagementParamVal).await?;
        let record = KeyRecord::decode(&data).map_err(|e| invalid(Slot::ManagementKey, e.to_string()))?;
        Ok(KeyEntry { index, record, total })
    }

    async fn list_keys(&self) -> Result<KeyListing> {
        let mut listing = KeyListing::default();

        match self.get_key(0).await {
            Ok(entry) => {
                listing.total = entry.total;
                listing.keys.push(entry);
            }
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                // GET_KEY leaves the count behind even when it fails
                listing.total = self.read_u32(Slot::ManagementParamVal).await?;
                if listing.total == 0 {
                    return match e {
                        Error::Management(ManagementError::NotFound) => Ok(listing),
                        e => Err(e),
                    };
                }
                log::warn!("key 0: {e}");
                listing.first_error = Some(KeyFailure { index: 0, error: e });
            }
        }

        let bound = listing.total.min(MAX_KEY_COUNT);
        if bound < listing.total {
            log::warn!("device reports {} keys, reading the first {bound}", listing.total);
        }
        let mut missing_run = match &listing.first_error {
            Some(failure) if is_not_found(&failure.error) => 1,
            _ => 0,
        };

        for index in 1..bound {
            match self.get_key(index).await {
                Ok(entry) => {
                    missing_run = 0;
                    listing.keys.push(entry);
                }
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    log::warn!("key {index}: {e}");
                    missing_run = if is_not_found(&e) { missing_run + 1 } else { 0 };
                    if listing.first_error.is_none() {
                        listing.first_error = Some(KeyFailure { index, error: e });
                    }
                    if missing_run == MISSING_RUN_LIMIT {
                        log::warn!("{MISSING_RUN_LIMIT} keys missing in a row, stopping at index {index}");
                        break;
                    }
                }
            }
        }

        log::debug!("listed {} of {} keys", listing.keys.len(), listing.total);
        Ok(listing)
    }

    async fn set_param(&self, id: ParamId, value: u32) -> Result<()> {
        log::debug!("set param {id} = {value}");
        self.link.write(Slot::ManagementParamId, &[id.get()]).await?;
        self.link.write(Slot::ManagementParamVal, &value.to_le_bytes()).await?;
        self.execute(commands::SET_PARAM).await
    }

    async fn get_param(&self, id: ParamId) -> Result<u32> {
        self.link.write(Slot::ManagementParamId, &[id.get()]).await?;
        self.execute(commands::GET_PARAM).await?;
        self.read_u32(Slot::ManagementParamVal).await
    }

    async fn set_name(&self, name: &str) -> Result<()> {
        log::debug!("set name {name:?}");
        self.link.write(Slot::ManagementName, &encode_name(name)).await?;
        self.execute(commands::SET_NAME).await
    }

    async fn name(&self) -> Result<String> {
        let value = self.link.read_optional(Slot::ManagementName).await?;
        Ok(value.map(|v| decode_name(&v)).unwrap_or_default())
    }

    async fn audit_log_count(&self) -> Result<u16> {
        let value = self.link.read(Slot::LogCount).await?;
        decode_u16(&value).ok_or_else(|| invalid(Slot::LogCount, format!("expected 2 bytes, got {}", value.len())))
    }

    async fn audit_log_entry(&self, index: u16) -> Result<AuditEntry> {
        self.link.write(Slot::LogIndex, &index.to_le_bytes()).await?;
        let value = self.link.read(Slot::LogEntry).await?;
        AuditEntry::from_bytes(&value).map_err(|e| match e {
            AuditEntryError::Empty => ManagementError::NotFound.into(),
            e => invalid(Slot::LogEntry, e.to_string()),
        })
    }

    async fn audit_log(&self) -> Result<Vec<AuditEntry>> {
        let count = self.audit_log_count().await?;
        let mut entries = Vec::with_capacity(count as usize);
        for index in 0..count {
            entries.push(self.audit_log_entry(index).await?);
        }
        Ok(entries)
    }
}
