//! Gatelink Controller
//!
//! BLE client for authenticating to gate controllers and administering them.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use gatelink_controller::{AuthSession, ControllerConfig, Deadline, ManagementClient, ble, key_store};
//! use gatelink_proto::Action;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let home = gatelink_controller::gatelink_home()?;
//!     let config = ControllerConfig::load_or_init(&home)?;
//!     let keys = key_store::open_default(&home, &config)?;
//!
//!     let adapter = ble::get_adapter().await?;
//!     let (peripheral, found) = ble::find_device(&adapter, None, Duration::from_secs(5)).await?;
//!     let gate = Deadline::new(ble::BleGate::attach(peripheral).await?, Duration::from_secs(5));
//!
//!     let mut session = AuthSession::new(found.address, gate, keys, &config);
//!     let outcome = session.authenticate_with(Action::AdminMode).await?;
//!     if outcome.admin {
//!         let listing = ManagementClient::new(&mut session).list_keys().await?;
//!         println!("{} keys", listing.total);
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(feature = "ble-central")]
pub mod ble;
pub mod config;
pub mod crypto;
pub mod error;
pub mod key_store;
pub mod management;
pub mod session;
pub mod simulated;
pub mod transport;

pub use config::{ControllerConfig, gatelink_home};
pub use error::{
    ConfigError, CryptoError, Error, KeyStoreError, ManagementError, ProtocolError, Result, TransportError,
};
pub use key_store::{KeyBacking, KeyStore, SoftwareKeyStore, open_default, own_key_record};
pub use management::{KeyEntry, KeyFailure, KeyListing, MAX_KEY_COUNT, ManagementClient};
pub use session::{
    AdminHints, AuthSession, MemoryAdminHints, NonceSource, OsNonceSource, SessionOutcome, SessionState,
};
pub use transport::{Deadline, SlotLink, SlotTransport, WriteMode};
