//! Challenge-response handshake
//!
//! An [`AuthSession`] owns the link to one connected gate. `authenticate`
//! walks the handshake one slot operation at a time:
//!
//! 1. write the compressed public key to `client_pubkey`
//! 2. read `client_key_ack`, then `perm`
//! 3. read the 32-byte peer `nonce`, write a fresh `client_nonce`
//! 4. sign `SHA-256(nonce || client_nonce)`, write it to `authenticate`
//! 5. read `authenticate_ack`
//!
//! Any failure stops the sequence and leaves the session in
//! [`SessionState::Error`]. A new attempt starts over with new nonces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use data_encoding::HEXLOWER;
use gatelink_proto::{Action, NONCE_LEN, Permissions, Slot};
use rand::RngCore;

use crate::config::ControllerConfig;
use crate::crypto::handshake_digest;
use crate::error::{Error, ProtocolError, Result};
use crate::key_store::KeyStore;
use crate::transport::{SlotLink, SlotTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated { admin: bool },
    Error,
}

/// Remembers which devices last granted admin, for presentation only
///
/// The handshake keeps these up to date. Nothing in this crate reads them to
/// decide what a session may do.
pub trait AdminHints: Send + Sync {
    fn get(&self, device_id: &str) -> Option<bool>;
    fn set(&self, device_id: &str, admin: bool);
    fn clear(&self, device_id: &str);
}

#[derive(Debug, Default)]
pub struct MemoryAdminHints {
    hints: Mutex<HashMap<String, bool>>,
}

impl MemoryAdminHints {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdminHints for MemoryAdminHints {
    fn get(&self, device_id: &str) -> Option<bool> {
        self.hints.lock().unwrap_or_else(|e| e.into_inner()).get(device_id).copied()
    }

    fn set(&self, device_id: &str, admin: bool) {
        self.hints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_id.to_string(), admin);
    }

    fn clear(&self, device_id: &str) {
        self.hints.lock().unwrap_or_else(|e| e.into_inner()).remove(device_id);
    }
}

/// Supplies the client nonce for each handshake attempt
///
/// Every call must return a value never handed out before.
pub trait NonceSource: Send + Sync {
    fn next_nonce(&self) -> [u8; NONCE_LEN];
}

/// Operating system randomness
#[derive(Debug, Default, Clone, Copy)]
pub struct OsNonceSource;

impl NonceSource for OsNonceSource {
    fn next_nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        nonce
    }
}

/// Result of a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub admin: bool,
    pub permissions: Permissions,
}

/// Handshake state for one connected device
pub struct AuthSession<T: SlotTransport> {
    device_id: String,
    link: SlotLink<T>,
    keys: Arc<dyn KeyStore>,
    hints: Arc<dyn AdminHints>,
    nonces: Arc<dyn NonceSource>,
    state: SessionState,
    permissions: Permissions,
}

impl<T: SlotTransport> AuthSession<T> {
    /// A session over an already connected transport
    pub fn new(device_id: impl Into<String>, transport: T, keys: Arc<dyn KeyStore>, config: &ControllerConfig) -> Self {
        Self {
            device_id: device_id.into(),
            link: SlotLink::new(transport, config),
            keys,
            hints: Arc::new(MemoryAdminHints::new()),
            nonces: Arc::new(OsNonceSource),
            state: SessionState::Connected,
            permissions: Permissions::default(),
        }
    }

    pub fn with_admin_hints(mut self, hints: Arc<dyn AdminHints>) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_nonce_source(mut self, nonces: Arc<dyn NonceSource>) -> Self {
        self.nonces = nonces;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_admin(&self) -> bool {
        self.state == SessionState::Authenticated { admin: true }
    }

    /// Permission byte from the last handshake that got that far
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn link(&self) -> &SlotLink<T> {
        &self.link
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn connecting(&mut self) {
        log::debug!("{}: connecting", self.device_id);
        self.state = SessionState::Connecting;
    }

    pub fn connected(&mut self) {
        log::debug!("{}: connected", self.device_id);
        self.state = SessionState::Connected;
    }

    pub fn disconnected(&mut self) {
        log::debug!("{}: disconnected", self.device_id);
        self.state = SessionState::Disconnected;
        self.permissions = Permissions::default();
    }

    fn require_link(&self) -> Result<()> {
        match self.state {
            SessionState::Disconnected | SessionState::Connecting => Err(ProtocolError::NotConnected.into()),
            _ => Ok(()),
        }
    }

    /// A failed link takes the session to [`SessionState::Error`]
    pub(crate) fn observe<R>(&mut self, result: &Result<R>) {
        if let Err(e) = result
            && e.is_transport()
        {
            log::warn!("{}: {e}", self.device_id);
            self.state = SessionState::Error;
        }
    }

    /// Tell the gate what to do once the handshake succeeds
    pub async fn set_action(&mut self, action: Action) -> Result<()> {
        self.require_link()?;
        log::debug!("{}: action {action:?}", self.device_id);
        let result = self
            .link
            .write(Slot::Action, &action.to_bytes())
            .await
            .map_err(Error::from);
        self.observe(&result);
        result
    }

    /// [`set_action`](Self::set_action) followed by [`authenticate`](Self::authenticate)
    pub async fn authenticate_with(&mut self, action: Action) -> Result<SessionOutcome> {
        self.set_action(action).await?;
        self.authenticate().await
    }

    /// Run the handshake from the first step
    ///
    /// Dropping the future part way leaves the session in
    /// [`SessionState::Authenticating`], which grants nothing; the next call
    /// starts over with new nonces.
    pub async fn authenticate(&mut self) -> Result<SessionOutcome> {
        self.require_link()?;
        self.state = SessionState::Authenticating;
        self.permissions = Permissions::default();

        match self.handshake().await {
            Ok(outcome) => {
                log::info!("{}: authenticated (admin: {})", self.device_id, outcome.admin);
                self.state = SessionState::Authenticated { admin: outcome.admin };
                Ok(outcome)
            }
            Err(e) => {
                log::warn!("{}: authentication failed: {e}", self.device_id);
                self.state = SessionState::Error;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<SessionOutcome> {
        let device = self.device_id.as_str();

        let public_key = self.keys.public_key_compressed();
        log::debug!("{device}: presenting key {}", HEXLOWER.encode(&public_key));
        self.link.write(Slot::ClientPubkey, &public_key).await?;

        let ack = self.link.read_optional(Slot::ClientKeyAck).await?;
        if first_byte(ack.as_deref()) == 0 {
            self.hints.clear(device);
            return Err(ProtocolError::KeyNotAuthorized.into());
        }

        let perm = self.link.read_optional(Slot::Perm).await?;
        let permissions = Permissions(first_byte(perm.as_deref()));
        log::debug!("{device}: permissions 0x{:02x}", permissions.0);
        self.hints.set(device, permissions.is_admin());
        self.permissions = permissions;

        let nonce = self.link.read(Slot::Nonce).await?;
        let server_nonce: [u8; NONCE_LEN] = nonce.as_slice().try_into().map_err(|_| ProtocolError::InvalidData {
            slot: Slot::Nonce,
            detail: format!("expected {NONCE_LEN} bytes, got {}", nonce.len()),
        })?;
        log::debug!("{device}: server nonce {}", HEXLOWER.encode(&server_nonce));

        let client_nonce = self.nonces.next_nonce();
        log::debug!("{device}: client nonce {}", HEXLOWER.encode(&client_nonce));
        self.link.write(Slot::ClientNonce, &client_nonce).await?;

        let digest = handshake_digest(&server_nonce, &client_nonce);
        let signature = self.keys.sign(&digest)?;
        self.link.write(Slot::Authenticate, &signature).await?;

        let ack = self.link.read_optional(Slot::AuthenticateAck).await?;
        if first_byte(ack.as_deref()) == 0 {
            return Err(ProtocolError::AuthenticationFailed.into());
        }

        Ok(SessionOutcome { admin: permissions.is_admin(), permissions })
    }
}

/// Absent and empty values read as zero
fn first_byte(value: Option<&[u8]>) -> u8 {
    value.and_then(|v| v.first().copied()).unwrap_or(0)
}
