//! In-memory gate controller
//!
//! [`SimulatedGate`] plays the peer side of the protocol over the
//! [`SlotTransport`] port: it looks up presented keys, checks handshake
//! signatures, runs management commands and keeps an audit log. Every
//! operation is journaled, and slots can be removed, overridden or made to
//! fail, which is what the test-suite uses it for.
//!
//! Clones share state, so a test keeps one clone for inspection and hands
//! another to the session.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gatelink_proto::{
    Action, AuditEntry, KEY_RECORD_LEN, KeyRecord, NONCE_LEN, ParamId, Permissions, SIGNATURE_LEN,
    Slot, SlotCapabilities, Status, commands, decode_name, decode_u16, decode_u32, encode_name,
};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use rand::RngCore;

use crate::crypto::handshake_digest;
use crate::error::TransportError;
use crate::transport::{SlotTransport, WriteMode};

/// Entries kept before the oldest is dropped
const AUDIT_CAPACITY: usize = 32;

/// Address reported for the simulated client in audit entries
const CLIENT_ADDRESS: [u8; 6] = [0x06, 0x05, 0x04, 0x03, 0x02, 0x01];

/// One transport operation as the peer saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write(Slot, Vec<u8>, WriteMode),
    Read(Slot),
}

impl Op {
    pub fn slot(&self) -> Slot {
        match self {
            Op::Write(slot, ..) | Op::Read(slot) => *slot,
        }
    }
}

#[derive(Clone, Default)]
pub struct SimulatedGate {
    state: Arc<Mutex<GateState>>,
}

struct GateState {
    keys: Vec<KeyRecord>,
    params: BTreeMap<u8, u32>,
    audit: VecDeque<AuditEntry>,
    values: HashMap<Slot, Vec<u8>>,

    nonce: [u8; NONCE_LEN],
    fixed_nonce: bool,
    prog_mode: bool,
    presented: Option<[u8; KEY_RECORD_LEN]>,
    matched: Option<KeyRecord>,
    perm: u8,
    authenticated: bool,
    started: Instant,

    missing: HashSet<Slot>,
    failing: HashMap<Slot, TransportError>,
    overrides: HashMap<Slot, Vec<u8>>,
    get_key_failures: HashMap<u32, Status>,

    journal: Vec<Op>,
    latency: Duration,
    in_flight: HashSet<Slot>,
    overlaps: usize,
}

impl Default for GateState {
    fn default() -> Self {
        let mut values = HashMap::new();
        values.insert(Slot::Action, vec![0; 2]);
        values.insert(Slot::ClientKeyAck, vec![0]);
        values.insert(Slot::Perm, vec![0]);
        values.insert(Slot::AuthenticateAck, vec![0]);
        values.insert(Slot::ManagementKey, vec![0; KEY_RECORD_LEN]);
        values.insert(Slot::ManagementParamId, vec![0]);
        values.insert(Slot::ManagementParamVal, vec![0; 4]);
        values.insert(Slot::ManagementName, encode_name("Gate").to_vec());
        values.insert(Slot::ManagementResult, vec![0]);
        values.insert(Slot::LogIndex, vec![0; 2]);

        let params = [(0, 10_000), (1, 5_000), (2, 60_000), (3, 100), (4, 30_000)]
            .into_iter()
            .collect();

        Self {
            keys: Vec::new(),
            params,
            audit: VecDeque::new(),
            values,
            nonce: random_nonce(),
            fixed_nonce: false,
            prog_mode: false,
            presented: None,
            matched: None,
            perm: 0,
            authenticated: false,
            started: Instant::now(),
            missing: HashSet::new(),
            failing: HashMap::new(),
            overrides: HashMap::new(),
            get_key_failures: HashMap::new(),
            journal: Vec::new(),
            latency: Duration::ZERO,
            in_flight: HashSet::new(),
            overlaps: 0,
        }
    }
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

impl SimulatedGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_key(&self, record: KeyRecord) {
        self.state().keys.push(record);
    }

    pub fn keys(&self) -> Vec<KeyRecord> {
        self.state().keys.clone()
    }

    /// Serve this nonce on every handshake instead of a fresh random one
    pub fn set_nonce(&self, nonce: [u8; NONCE_LEN]) {
        let mut state = self.state();
        state.nonce = nonce;
        state.fixed_nonce = true;
    }

    /// Programming mode admits any key as admin
    pub fn set_prog_mode(&self, on: bool) {
        self.state().prog_mode = on;
    }

    /// Reads of `slot` return `value` regardless of peer state
    pub fn override_value(&self, slot: Slot, value: Vec<u8>) {
        self.state().overrides.insert(slot, value);
    }

    pub fn clear_override(&self, slot: Slot) {
        self.state().overrides.remove(&slot);
    }

    /// Every operation on `slot` fails with `error`
    pub fn fail_slot(&self, slot: Slot, error: TransportError) {
        self.state().failing.insert(slot, error);
    }

    /// GET_KEY for `index` reports `status`
    pub fn fail_get_key(&self, index: u32, status: Status) {
        self.state().get_key_failures.insert(index, status);
    }

    /// The slot is not exposed by this device
    pub fn remove_slot(&self, slot: Slot) {
        self.state().missing.insert(slot);
    }

    /// Time each operation takes before it completes
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn journal(&self) -> Vec<Op> {
        self.state().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    /// Operations that started while another one on the same slot was pending
    pub fn overlapping_ops(&self) -> usize {
        self.state().overlaps
    }

    pub fn param(&self, id: ParamId) -> Option<u32> {
        self.state().params.get(&id.get()).copied()
    }

    pub fn name(&self) -> String {
        decode_name(self.state().values.get(&Slot::ManagementName).map_or(&[][..], |v| v.as_slice()))
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state().audit.iter().cloned().collect()
    }

    pub fn push_audit_entry(&self, entry: AuditEntry) {
        self.state().record_audit(entry);
    }

    /// Action the last client wrote before authenticating
    pub fn last_action(&self) -> Option<Action> {
        let state = self.state();
        state.values.get(&Slot::Action).and_then(|v| decode_u16(v)).and_then(Action::from_code)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    /// Marks `slot` as pending, then waits out the configured latency
    async fn begin(&self, op: Op) -> Result<InFlight, TransportError> {
        let slot = op.slot();
        let latency = {
            let mut state = self.state();
            state.journal.push(op);
            if !state.in_flight.insert(slot) {
                state.overlaps += 1;
            }
            state.latency
        };
        let guard = InFlight { gate: self.clone(), slot };

        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }

        let failure = self.state().failing.get(&slot).cloned();
        match failure {
            Some(e) => Err(e),
            None => Ok(guard),
        }
    }
}

/// Clears the pending mark, also when the operation is cancelled
struct InFlight {
    gate: SimulatedGate,
    slot: Slot,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.gate.state().in_flight.remove(&self.slot);
    }
}

impl GateState {
    fn set(&mut self, slot: Slot, value: Vec<u8>) {
        self.values.insert(slot, value);
    }

    fn read(&self, slot: Slot) -> Vec<u8> {
        if let Some(value) = self.overrides.get(&slot) {
            return value.clone();
        }
        match slot {
            Slot::Nonce => self.nonce.to_vec(),
            Slot::LogCount => (self.audit.len() as u16).to_le_bytes().to_vec(),
            Slot::LogEntry => {
                let index = self.values.get(&Slot::LogIndex).and_then(|v| decode_u16(v)).unwrap_or(0);
                self.audit
                    .get(index as usize)
                    .map(|e| e.to_bytes().to_vec())
                    .unwrap_or_else(|| vec![0; Slot::LogEntry.size()])
            }
            _ => self.values.get(&slot).cloned().unwrap_or_default(),
        }
    }

    fn write(&mut self, slot: Slot, data: &[u8]) {
        self.set(slot, data.to_vec());
        match slot {
            Slot::ClientPubkey => self.present_key(data),
            Slot::Authenticate => self.check_signature(data),
            Slot::Management => {
                let status = match data.first() {
                    Some(&cmd) => self.management(cmd),
                    None => Status::InvalidOperation,
                };
                self.set(Slot::ManagementResult, vec![status.to_byte()]);
            }
            _ => {}
        }
    }

    fn present_key(&mut self, data: &[u8]) {
        self.authenticated = false;
        self.set(Slot::AuthenticateAck, vec![0]);

        let presented = KeyRecord::decode(data).ok();
        self.presented = presented.map(|r| r.to_bytes());
        self.matched = presented.and_then(|p| self.keys.iter().find(|k| k.same_key(&p)).copied());

        self.perm = match (&self.matched, self.prog_mode) {
            (_, true) => Permissions::ADMIN,
            (Some(record), false) => record.flags(),
            (None, false) => 0,
        };
        let ack = u8::from(self.perm > 0);
        let perm = self.perm & !gatelink_proto::key_record::TYPE_MASK;
        self.set(Slot::ClientKeyAck, vec![ack]);
        self.set(Slot::Perm, vec![perm]);
    }

    fn check_signature(&mut self, data: &[u8]) {
        let client_nonce: Option<[u8; NONCE_LEN]> = self
            .values
            .get(&Slot::ClientNonce)
            .and_then(|v| v.as_slice().try_into().ok());

        // programming mode trusts the presented key itself
        let key = match (self.matched, self.prog_mode) {
            (Some(record), _) => Some(record),
            (None, true) => self.presented.and_then(|p| KeyRecord::decode(&p).ok()),
            (None, false) => None,
        };

        let ok = match (key, client_nonce, <[u8; SIGNATURE_LEN]>::try_from(data)) {
            (Some(key), Some(client_nonce), Ok(signature)) => {
                verify(&key, &handshake_digest(&self.nonce, &client_nonce), &signature)
            }
            _ => false,
        };

        self.authenticated = ok;
        self.set(Slot::AuthenticateAck, vec![u8::from(ok)]);

        let action = self.values.get(&Slot::Action).and_then(|v| decode_u16(v)).unwrap_or(0);
        let entry = AuditEntry {
            success: ok,
            presented_key: self.presented.unwrap_or([0; KEY_RECORD_LEN]),
            uptime_ms: self.started.elapsed().as_millis() as u64,
            address: CLIENT_ADDRESS,
            action,
        };
        self.record_audit(entry);

        if !self.fixed_nonce {
            self.nonce = random_nonce();
        }
    }

    fn record_audit(&mut self, entry: AuditEntry) {
        self.audit.push_front(entry);
        self.audit.truncate(AUDIT_CAPACITY);
    }

    fn management(&mut self, cmd: u8) -> Status {
        if !self.authenticated || !Permissions(self.perm).is_admin() {
            return Status::NotAdmin;
        }

        let key = self.values.get(&Slot::ManagementKey).and_then(|v| KeyRecord::decode(v).ok());
        let param_id = self.values.get(&Slot::ManagementParamId).and_then(|v| v.first().copied());
        let param_val = self.values.get(&Slot::ManagementParamVal).and_then(|v| decode_u32(v));

        match cmd {
            commands::ADD_KEY => {
                let Some(key) = key else { return Status::InvalidOperation };
                match self.keys.iter_mut().find(|k| k.same_key(&key)) {
                    Some(existing) => *existing = key,
                    None => self.keys.push(key),
                }
                Status::Ok
            }
            commands::DELETE_KEY => {
                let Some(key) = key else { return Status::InvalidOperation };
                let before = self.keys.len();
                self.keys.retain(|k| !k.same_key(&key));
                if self.keys.len() == before { Status::NotFound } else { Status::Ok }
            }
            commands::GET_KEY => {
                let index = param_val.unwrap_or(0);
                let total = self.keys.len() as u32;
                self.set(Slot::ManagementParamVal, total.to_le_bytes().to_vec());
                if let Some(status) = self.get_key_failures.get(&index) {
                    return *status;
                }
                match self.keys.get(index as usize) {
                    Some(record) => {
                        let bytes = record.to_bytes().to_vec();
                        self.set(Slot::ManagementKey, bytes);
                        Status::Ok
                    }
                    None => Status::NotFound,
                }
            }
            commands::SET_PARAM => match (param_id, param_val) {
                (Some(id), Some(value)) if id != u8::MAX => {
                    self.params.insert(id, value);
                    Status::Ok
                }
                _ => Status::InvalidOperation,
            },
            commands::GET_PARAM => match param_id.and_then(|id| self.params.get(&id).copied()) {
                Some(value) => {
                    self.set(Slot::ManagementParamVal, value.to_le_bytes().to_vec());
                    Status::Ok
                }
                None => Status::NotFound,
            },
            // the name slot already holds the new value
            commands::SET_NAME => Status::Ok,
            _ => Status::InvalidOperation,
        }
    }
}

fn verify(key: &KeyRecord, digest: &[u8; 32], signature: &[u8; SIGNATURE_LEN]) -> bool {
    match key.compressed_point() {
        Some(point) => {
            let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point) else { return false };
            let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else { return false };
            key.verify_prehash(digest, &sig).is_ok()
        }
        None => {
            let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(key.material()) else { return false };
            let sig = ed25519_dalek::Signature::from_bytes(signature);
            key.verify_strict(digest, &sig).is_ok()
        }
    }
}

#[async_trait]
impl SlotTransport for SimulatedGate {
    type Handle = Slot;

    fn resolve(&self, slot: Slot) -> Result<Slot, TransportError> {
        if self.state().missing.contains(&slot) {
            return Err(TransportError::SlotNotFound(slot));
        }
        Ok(slot)
    }

    fn capabilities(&self, slot: &Slot) -> SlotCapabilities {
        slot.capabilities()
    }

    async fn write(&self, slot: &Slot, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let _pending = self.begin(Op::Write(*slot, data.to_vec(), mode)).await?;
        let caps = slot.capabilities();
        let allowed = match mode {
            WriteMode::WithResponse => caps.write,
            WriteMode::WithoutResponse => caps.write_without_response,
        };
        if !allowed {
            return Err(TransportError::Unsupported { slot: *slot, op: "write" });
        }
        self.state().write(*slot, data);
        Ok(())
    }

    async fn read(&self, slot: &Slot) -> Result<Vec<u8>, TransportError> {
        let _pending = self.begin(Op::Read(*slot)).await?;
        if !slot.capabilities().read {
            return Err(TransportError::Unsupported { slot: *slot, op: "read" });
        }
        let value = self.state().read(*slot);
        Ok(value)
    }
}
