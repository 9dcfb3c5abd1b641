//! Key/value persistence contract shared by the wallet provider and the
//! session store. Values survive a reload only as long as the backing store
//! does; the client never assumes more than `get`/`set`/`remove`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::AnchorError;

pub const SELECTED_WALLET_ID_KEY: &str = "selected_wallet_id";
pub const BEARER_TOKEN_KEY: &str = "anchor_bearer_token";
pub const ACCOUNT_KEY_KEY: &str = "anchor_account_key";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AnchorError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AnchorError>;
    fn remove(&self, key: &str) -> Result<(), AnchorError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_error() -> AnchorError {
        AnchorError::Storage("mutex poisoned: memory store".to_string())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AnchorError> {
        let entries = self.entries.lock().map_err(|_| Self::lock_error())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AnchorError> {
        let mut entries = self.entries.lock().map_err(|_| Self::lock_error())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AnchorError> {
        let mut entries = self.entries.lock().map_err(|_| Self::lock_error())?;
        entries.remove(key);
        Ok(())
    }
}

/// JSON object file, rewritten in full on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// `<data_local_dir>/anchor-client/state.json`, or `./anchor-client` when
    /// the platform has no data directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("anchor-client")
            .join("state.json")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, AnchorError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(error) => {
                return Err(AnchorError::Storage(format!(
                    "read {}: {error}",
                    self.path.display()
                )));
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|error| {
            AnchorError::Storage(format!("decode {}: {error}", self.path.display()))
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), AnchorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                AnchorError::Storage(format!("create {}: {error}", parent.display()))
            })?;
        }
        let encoded = serde_json::to_string_pretty(entries)
            .map_err(|error| AnchorError::Storage(error.to_string()))?;
        std::fs::write(&self.path, encoded).map_err(|error| {
            AnchorError::Storage(format!("write {}: {error}", self.path.display()))
        })
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), AnchorError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| AnchorError::Storage("mutex poisoned: file store".to_string()))?;
        let mut entries = self.read_all()?;
        apply(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, AnchorError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| AnchorError::Storage("mutex poisoned: file store".to_string()))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AnchorError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), AnchorError> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }
}
