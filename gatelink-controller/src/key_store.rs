//! Signing identity used for the handshake
//!
//! One long-lived P-256 keypair per installation. It is created on first use
//! and reused afterwards; this crate never rotates it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use gatelink_proto::{COMPRESSED_KEY_LEN, KeyRecord, SIGNATURE_LEN};
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

use crate::config::ControllerConfig;
use crate::crypto::{compress_point, der_to_raw};
use crate::error::{CryptoError, KeyStoreError};

/// Where the private key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBacking {
    /// Platform credential store
    SecureStore,
    /// Hex file in GATELINK_HOME
    File,
    /// In memory only
    Ephemeral,
}

/// Signing capability consumed by the handshake
pub trait KeyStore: Send + Sync {
    /// SEC1 compressed public key
    fn public_key_compressed(&self) -> [u8; COMPRESSED_KEY_LEN];

    /// Sign a 32-byte SHA-256 digest, returning raw `r || s`
    ///
    /// The digest is signed as-is; callers hash first.
    fn sign(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN], CryptoError>;

    fn backing(&self) -> KeyBacking;
}

/// P-256 key held in process memory
pub struct SoftwareKeyStore {
    signing_key: SigningKey,
    public_key: [u8; COMPRESSED_KEY_LEN],
    backing: KeyBacking,
}

impl SoftwareKeyStore {
    pub fn generate() -> Result<Self, CryptoError> {
        Self::from_signing_key(SigningKey::random(&mut OsRng), KeyBacking::Ephemeral)
    }

    pub fn from_signing_key(signing_key: SigningKey, backing: KeyBacking) -> Result<Self, CryptoError> {
        let uncompressed = signing_key.verifying_key().to_encoded_point(false);
        let public_key = compress_point(uncompressed.as_bytes())?;
        Ok(Self { signing_key, public_key, backing })
    }

    /// Parse a 32-byte secret scalar, hex encoded
    pub fn from_hex(hex: &str, backing: KeyBacking) -> Result<Self, KeyStoreError> {
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.trim().as_bytes())
            .map_err(|e| KeyStoreError::Parse(e.to_string()))?;
        let signing_key = SigningKey::from_slice(&bytes).map_err(|e| KeyStoreError::Parse(e.to_string()))?;
        Ok(Self::from_signing_key(signing_key, backing)?)
    }

    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.signing_key.to_bytes())
    }

    /// Load the key stored at `path`, creating it on first use
    pub fn load_or_create(path: &Path) -> Result<Self, KeyStoreError> {
        if path.exists() {
            let hex = fs::read_to_string(path)?;
            let store = Self::from_hex(&hex, KeyBacking::File)?;
            log::info!("loaded signing key from {}", path.display());
            return Ok(store);
        }

        let mut store = Self::generate()?;
        store.backing = KeyBacking::File;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, store.to_hex())?;
        log::info!("created signing key at {}", path.display());
        Ok(store)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl KeyStore for SoftwareKeyStore {
    fn public_key_compressed(&self) -> [u8; COMPRESSED_KEY_LEN] {
        self.public_key
    }

    fn sign(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        der_to_raw(signature.to_der().as_bytes())
    }

    fn backing(&self) -> KeyBacking {
        self.backing
    }
}

const IDENTITY_FILE: &str = "identity.key";

#[cfg(feature = "keyring")]
const KEYRING_SERVICE: &str = "gatelink";
const KEYRING_USER: &str = "signing-key";

#[cfg(feature = "keyring")]
fn keyring_error(e: keyring::Error) -> KeyStoreError {
    KeyStoreError::Keyring(e.to_string())
}

/// Load the key from the platform credential store, creating it on first use
///
/// Fails when the store does not hand a freshly created key back, so a
/// caller never ends up with an identity that only lives in this process.
#[cfg(feature = "keyring")]
pub fn load_from_keyring() -> Result<SoftwareKeyStore, KeyStoreError> {
    load_keyring_entry(KEYRING_USER)
}

#[cfg(feature = "keyring")]
fn load_keyring_entry(user: &str) -> Result<SoftwareKeyStore, KeyStoreError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, user).map_err(keyring_error)?;

    match entry.get_password() {
        Ok(hex) => SoftwareKeyStore::from_hex(&hex, KeyBacking::SecureStore),
        Err(keyring::Error::NoEntry) => {
            let mut store = SoftwareKeyStore::generate()?;
            store.backing = KeyBacking::SecureStore;
            let hex = store.to_hex();
            entry.set_password(&hex).map_err(keyring_error)?;

            // read back through a new handle; non-persistent stores lose it
            let stored = keyring::Entry::new(KEYRING_SERVICE, user).and_then(|e| e.get_password());
            if !matches!(&stored, Ok(value) if *value == hex) {
                let _ = entry.delete_credential();
                return Err(KeyStoreError::Keyring("credential store does not keep secrets".into()));
            }
            log::info!("created signing key in the platform credential store");
            Ok(store)
        }
        Err(e) => Err(keyring_error(e)),
    }
}

/// Open the installation's signing identity
///
/// An existing `identity.key` in `home` always wins, so the identity never
/// changes once a key file exists. Otherwise the platform credential store
/// is used when compiled in and enabled, with the key file as fallback.
pub fn open_default(home: &Path, config: &ControllerConfig) -> Result<Arc<dyn KeyStore>, KeyStoreError> {
    open_identity(home, config, KEYRING_USER)
}

fn open_identity(
    home: &Path,
    config: &ControllerConfig,
    keyring_user: &str,
) -> Result<Arc<dyn KeyStore>, KeyStoreError> {
    let path = home.join(IDENTITY_FILE);

    #[cfg(feature = "keyring")]
    if config.keyring && !path.exists() {
        match load_keyring_entry(keyring_user) {
            Ok(store) => return Ok(Arc::new(store)),
            Err(e) => log::warn!("credential store unavailable ({e}), using key file"),
        }
    }
    #[cfg(not(feature = "keyring"))]
    let _ = (config, keyring_user);

    let store = SoftwareKeyStore::load_or_create(&path)?;
    Ok(Arc::new(store))
}

/// The record an administrator adds on the device to admit this client
pub fn own_key_record(store: &dyn KeyStore, admin: bool) -> Result<KeyRecord, CryptoError> {
    KeyRecord::from_compressed_point(&store.public_key_compressed(), admin)
        .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::hazmat::PrehashVerifier;

    #[test]
    fn signature_verifies_against_compressed_key() {
        let store = SoftwareKeyStore::generate().unwrap();
        let digest = [0x42u8; 32];
        let raw = store.sign(&digest).unwrap();

        let key = VerifyingKey::from_sec1_bytes(&store.public_key_compressed()).unwrap();
        let sig = Signature::from_slice(&raw).unwrap();
        assert!(key.verify_prehash(&digest, &sig).is_ok());

        let other = [0x43u8; 32];
        assert!(key.verify_prehash(&other, &sig).is_err());
    }

    #[test]
    fn key_file_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.key");

        let first = SoftwareKeyStore::load_or_create(&path).unwrap();
        assert_eq!(first.backing(), KeyBacking::File);
        let second = SoftwareKeyStore::load_or_create(&path).unwrap();
        assert_eq!(first.public_key_compressed(), second.public_key_compressed());
    }

    #[test]
    fn rejects_corrupt_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        fs::write(&path, "not hex").unwrap();
        assert!(matches!(SoftwareKeyStore::load_or_create(&path), Err(KeyStoreError::Parse(_))));

        fs::write(&path, "00".repeat(32)).unwrap();
        assert!(matches!(SoftwareKeyStore::load_or_create(&path), Err(KeyStoreError::Parse(_))));
    }

    #[test]
    fn own_record_carries_parity_and_admin_bit() {
        let store = SoftwareKeyStore::generate().unwrap();
        let record = own_key_record(&store, true).unwrap();
        let public = store.public_key_compressed();
        assert_eq!(record.flags(), public[0] | 0x80);
        assert_eq!(record.material().as_slice(), &public[1..]);
        assert_eq!(record.compressed_point(), Some(public));
    }

    #[cfg(not(feature = "keyring"))]
    #[test]
    fn default_store_is_a_file_in_home() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_default(dir.path(), &ControllerConfig::default()).unwrap();
        assert_eq!(store.backing(), KeyBacking::File);
        assert!(dir.path().join(IDENTITY_FILE).exists());
    }

    #[test]
    fn existing_key_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = SoftwareKeyStore::load_or_create(&dir.path().join(IDENTITY_FILE)).unwrap();

        let store = open_identity(dir.path(), &ControllerConfig::default(), "gatelink-test-unused").unwrap();
        assert_eq!(store.backing(), KeyBacking::File);
        assert_eq!(store.public_key_compressed(), file.public_key_compressed());
    }

    #[cfg(feature = "keyring")]
    fn scratch_keyring_user() -> String {
        use rand::RngCore;
        let mut tag = [0u8; 8];
        OsRng.fill_bytes(&mut tag);
        format!("gatelink-test-{}", data_encoding::HEXLOWER.encode(&tag))
    }

    #[cfg(feature = "keyring")]
    fn remove_keyring_user(user: &str) {
        let _ = keyring::Entry::new(KEYRING_SERVICE, user).and_then(|e| e.delete_credential());
    }

    #[cfg(feature = "keyring")]
    #[test]
    fn keyring_identity_persists_across_loads() {
        let user = scratch_keyring_user();
        match load_keyring_entry(&user) {
            Ok(first) => {
                let second = load_keyring_entry(&user);
                remove_keyring_user(&user);
                let second = second.unwrap();
                assert_eq!(first.backing(), KeyBacking::SecureStore);
                assert_eq!(first.public_key_compressed(), second.public_key_compressed());
            }
            // no platform store on this machine: must refuse rather than hand out a throwaway key
            Err(e) => assert!(matches!(e, KeyStoreError::Keyring(_))),
        }
    }

    #[cfg(feature = "keyring")]
    #[test]
    fn default_identity_is_stable_with_keyring_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let user = scratch_keyring_user();
        let config = ControllerConfig::default();
        assert!(config.keyring);

        let first = open_identity(dir.path(), &config, &user);
        let second = open_identity(dir.path(), &config, &user);
        remove_keyring_user(&user);

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.backing(), second.backing());
        assert_eq!(first.public_key_compressed(), second.public_key_compressed());
    }
}
