//! Persistent signing identity.
//!
//! One keypair per installation, created on first use. Losing the stored key
//! changes the player's short id.

use std::path::{Path, PathBuf};

use nostr::nips::nip19::ToBech32;
use nostr::{Keys, PublicKey};
use parking_lot::Mutex;
use planebattle_core::PlayerId;
use serde::{Deserialize, Serialize};

const KEY_FILE_NAME: &str = "keystore.json";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("key store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key store format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("no platform config directory")]
    NoConfigDir,
}

/// Where the secret key lives between runs.
pub trait KeyStore: Send + Sync {
    /// The stored secret key (nsec or hex), if any.
    fn load(&self) -> Result<Option<String>, KeyStoreError>;
    fn save(&self, keys: &Keys) -> Result<(), KeyStoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyFileData {
    nsec: String,
    hex_pubkey: String,
}

/// JSON file under the platform config directory.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/planebattle/keystore.json`.
    pub fn open_default() -> Result<Self, KeyStoreError> {
        let dir = dirs::config_dir().ok_or(KeyStoreError::NoConfigDir)?;
        Ok(Self::new(dir.join("planebattle").join(KEY_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<String>, KeyStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)?;
        let data: KeyFileData = serde_json::from_str(&json)?;
        Ok(Some(data.nsec))
    }

    fn save(&self, keys: &Keys) -> Result<(), KeyStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let nsec = keys
            .secret_key()
            .to_bech32()
            .map_err(|e| KeyStoreError::InvalidKey(e.to_string()))?;
        let data = KeyFileData {
            nsec,
            hex_pubkey: keys.public_key().to_hex(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }
}

/// In-process store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    slot: Mutex<Option<String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(secret.into())),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<String>, KeyStoreError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, keys: &Keys) -> Result<(), KeyStoreError> {
        let nsec = keys
            .secret_key()
            .to_bech32()
            .map_err(|e| KeyStoreError::InvalidKey(e.to_string()))?;
        *self.slot.lock() = Some(nsec);
        Ok(())
    }
}

/// Load the stored keypair, or generate and store a fresh one. A stored key
/// that no longer parses is replaced.
pub fn load_or_create_keys(store: &dyn KeyStore) -> Result<Keys, KeyStoreError> {
    let loaded = match store.load() {
        Ok(loaded) => loaded,
        Err(KeyStoreError::Format(e)) => {
            log::warn!("Unreadable key store, generating a new identity: {e}");
            None
        }
        Err(e) => return Err(e),
    };
    if let Some(secret) = loaded {
        match Keys::parse(&secret) {
            Ok(keys) => return Ok(keys),
            Err(e) => log::warn!("Stored key is invalid, generating a new identity: {e}"),
        }
    }
    let keys = Keys::generate();
    store.save(&keys)?;
    log::info!("Generated new identity {}", short_id(&keys.public_key()));
    Ok(keys)
}

/// The last 8 hex characters of the public key.
pub fn short_id(public_key: &PublicKey) -> PlayerId {
    let hex = public_key.to_hex();
    PlayerId::new(&hex[hex.len().saturating_sub(8)..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_persists_identity() {
        let store = MemoryKeyStore::new();
        let first = load_or_create_keys(&store).unwrap();
        let second = load_or_create_keys(&store).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("nested").join(KEY_FILE_NAME));
        assert!(store.load().unwrap().is_none());

        let keys = load_or_create_keys(&store).unwrap();
        assert!(store.path().exists());
        let again = load_or_create_keys(&FileKeyStore::new(store.path())).unwrap();
        assert_eq!(keys.public_key(), again.public_key());
    }

    #[test]
    fn test_corrupt_key_is_replaced() {
        let store = MemoryKeyStore::with_secret("not-a-key");
        let keys = load_or_create_keys(&store).unwrap();
        let stored = store.load().unwrap().unwrap();
        assert_eq!(Keys::parse(&stored).unwrap().public_key(), keys.public_key());
    }

    #[test]
    fn test_corrupt_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KEY_FILE_NAME);
        std::fs::write(&path, "{ nope").unwrap();
        let store = FileKeyStore::new(&path);
        let keys = load_or_create_keys(&store).unwrap();
        assert_eq!(
            load_or_create_keys(&store).unwrap().public_key(),
            keys.public_key()
        );
    }

    #[test]
    fn test_short_id_is_pubkey_suffix() {
        let keys = Keys::generate();
        let hex = keys.public_key().to_hex();
        let id = short_id(&keys.public_key());
        assert_eq!(id.as_str().len(), 8);
        assert!(hex.ends_with(id.as_str()));
    }
}
