//! Record persistence.
//!
//! Records are grouped by key (`"services"`, `"notifications"`, ...) and each
//! key holds one JSON list. Callers always load and save whole lists, so a
//! failed save leaves the previous list intact.
//!
//! ```text
//! <root>/
//!   services.json        # [ServiceJob, ...]
//!   notifications.json   # [NotificationRecord, ...]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::{fs, io};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded while saving {key}")]
    QuotaExceeded { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }

    pub fn user_message(&self) -> &'static str {
        if self.is_quota_exceeded() {
            "Device storage is full; the change was not saved."
        } else {
            "The change could not be saved."
        }
    }

    pub fn remediation(&self) -> &'static str {
        if self.is_quota_exceeded() {
            "Free up space by clearing old records or browser data, then try again."
        } else {
            "Try again. If it keeps failing, check that the data directory is writable."
        }
    }
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// A durable key → list-of-records store.
///
/// Implementors only move raw JSON text; typed `load`/`save` are provided.
pub trait RecordStore {
    fn read_raw(&self, key: &str) -> Result<Option<String>>;

    fn write_raw(&self, key: &str, contents: &str) -> Result<()>;

    /// Load the list under `key`, or `default` when nothing has been saved.
    fn load<T: DeserializeOwned>(&self, key: &str, default: Vec<T>) -> Result<Vec<T>> {
        match self.read_raw(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(default),
        }
    }

    /// Replace the whole list under `key`.
    fn save<T: Serialize>(&self, key: &str, records: &[T]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.write_raw(key, &raw)
    }
}

/// In-process store with an optional byte quota across all keys.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::default(),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl RecordStore for MemoryStore {
    fn read_raw(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write_raw(&self, key: &str, contents: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if others + key.len() + contents.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        entries.insert(key.to_string(), contents.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key under a root directory.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Creates a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl RecordStore for JsonFileStore {
    fn read_raw(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_raw(&self, key: &str, contents: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        // Write-then-rename so a crash mid-write never truncates the list.
        let written = fs::write(&tmp, contents).and_then(|()| fs::rename(&tmp, &path));
        match written {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                if e.kind() == io::ErrorKind::StorageFull {
                    Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                    })
                } else {
                    Err(e.into())
                }
            }
        }
    }
}
