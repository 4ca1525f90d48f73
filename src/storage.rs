//! Key/value snapshot of device state that survives restarts.
//!
//! Each device with a `storage_file` owns one JSON document of named
//! entries. Every entry remembers when it last changed so stale values can
//! be ignored after a long downtime. Unreadable or corrupt files are logged
//! and treated as a cold start; write failures are logged and the device
//! keeps running from memory.

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keys shared by several devices.
pub mod keys {
    pub const LAST_VALUE: &str = "last_value";
    pub const LAST_VALUE_SINCE: &str = "last_value_since";
    pub const LAST_ERROR: &str = "last_error";
    pub const LAST_ERROR_SINCE: &str = "last_error_since";
    pub const LAST_OBSERVATION: &str = "last_observation";
    pub const POSITION: &str = "position";
    pub const DIM_STATE: &str = "dim_state";
    pub const SWITCH_STATE: &str = "switch_state";
}

/// A stored value and its last change time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub value: serde_json::Value,
    pub changed: DateTime<Local>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StorageDocument {
    entries: BTreeMap<String, StorageEntry>,
}

/// Persistent key/value store of one device.
#[derive(Debug)]
pub struct Storage {
    path: Option<PathBuf>,
    max_age: Option<Duration>,
    entries: BTreeMap<String, StorageEntry>,
    dirty: bool,
}

impl Storage {
    /// Store backed by `path`. Nothing is read until [`Storage::load`].
    pub fn new(path: Option<PathBuf>, max_age: Option<Duration>) -> Self {
        Self {
            path,
            max_age,
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Memory-only store.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(None, None)
    }

    /// Read the backing file, dropping entries older than the max age.
    pub fn load(&mut self, now: DateTime<Local>) {
        let Some(path) = &self.path else {
            return;
        };

        let document = match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<StorageDocument>(&bytes) {
                Ok(document) => document,
                Err(e) => {
                    warn!("Failed to parse storage file {:?}, starting cold: {}", path, e);
                    StorageDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No storage file at {:?} (first run)", path);
                StorageDocument::default()
            }
            Err(e) => {
                error!("Failed to read storage file {:?}: {}", path, e);
                StorageDocument::default()
            }
        };

        let max_age = self.max_age;
        self.entries = document
            .entries
            .into_iter()
            .filter(|(key, entry)| {
                let fresh = max_age.is_none_or(|max| {
                    (now - entry.changed)
                        .to_std()
                        .map(|age| age <= max)
                        .unwrap_or(true)
                });
                if !fresh {
                    debug!("Dropping stale storage entry '{}' from {:?}", key, path);
                }
                fresh
            })
            .collect();
        self.dirty = false;
        debug!("Loaded {} storage entries from {:?}", self.entries.len(), path);
    }

    /// Write the document if anything changed. Errors are logged.
    pub fn save(&mut self) {
        if !self.dirty {
            return;
        }
        let Some(path) = &self.path else {
            self.dirty = false;
            return;
        };
        match write_document(path, &self.entries) {
            Ok(()) => {
                self.dirty = false;
                debug!("Saved {} storage entries to {:?}", self.entries.len(), path);
            }
            Err(e) => error!("Failed to save storage file {:?}: {}", path, e),
        }
    }

    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn entry(&self, key: &str) -> Option<&StorageEntry> {
        self.entries.get(key)
    }

    /// Typed value of `key`; type mismatches read as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring storage entry '{}' with unexpected type: {}", key, e);
                None
            }
        }
    }

    /// Store `value`; the change time only moves when the value differs.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T, now: DateTime<Local>) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                error!("Cannot serialize storage entry '{}': {}", key, e);
                return;
            }
        };
        if self.entries.get(key).is_some_and(|e| e.value == value) {
            return;
        }
        self.entries.insert(
            key.to_string(),
            StorageEntry {
                value,
                changed: now,
            },
        );
        self.dirty = true;
    }

    /// Store `value` and write through immediately.
    pub fn set_and_save<T: Serialize>(&mut self, key: &str, value: &T, now: DateTime<Local>) {
        self.set(key, value, now);
        self.save();
    }
}

fn write_document(
    path: &Path,
    entries: &BTreeMap<String, StorageEntry>,
) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let document = StorageDocument {
        entries: entries.clone(),
    };
    let data = serde_json::to_vec_pretty(&document)?;
    fs::write(path, data)
}
