//! Durable offline preferences.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::atomic_write::atomic_write;

use super::status::present;

/// Key under which the settings record is stored.
pub const SETTINGS_KEY: &str = "offlineSettings";
/// File name of the on-disk key-value document.
pub const STORE_FILE_NAME: &str = "storage.json";

/// Persisted offline preferences. Missing fields read as their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub offline: bool,
    pub prefer_online: bool,
    pub auto_updates: bool,
    pub current_version: Option<String>,
    pub current_date: Option<String>,
}

impl Settings {
    /// Overlay every field present in `patch`.
    pub fn merged(&self, patch: &SettingsPatch) -> Settings {
        Settings {
            offline: patch.offline.unwrap_or(self.offline),
            prefer_online: patch.prefer_online.unwrap_or(self.prefer_online),
            auto_updates: patch.auto_updates.unwrap_or(self.auto_updates),
            current_version: patch
                .current_version
                .clone()
                .unwrap_or_else(|| self.current_version.clone()),
            current_date: patch
                .current_date
                .clone()
                .unwrap_or_else(|| self.current_date.clone()),
        }
    }
}

/// Partial settings change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_updates: Option<bool>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_version: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_date: Option<Option<String>>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == SettingsPatch::default()
    }
}

/// Errors from the durable key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid store document {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

/// Durable string-keyed store of JSON values.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// In-memory store, used when nothing should outlive the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Single JSON document on disk holding every key.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `storage.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_document()?.remove(key))
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut document = match self.read_document() {
            Ok(document) => document,
            Err(StoreError::Parse { path, source }) => {
                warn!("Replacing unreadable store {}: {source}", path.display());
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };
        document.insert(key.to_string(), value);
        let data = serde_json::to_vec_pretty(&document).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        atomic_write(&self.path, &data).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Typed view of the settings record inside a [`KeyValueStore`].
pub struct SettingsStore {
    inner: Box<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(inner: Box<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// Read the record, falling back to defaults when absent or malformed.
    pub fn load(&self) -> Settings {
        let value = match self.inner.get(SETTINGS_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return Settings::default(),
            Err(err) => {
                warn!("Offline settings unreadable, using defaults: {err}");
                return Settings::default();
            }
        };
        if value.is_null() {
            return Settings::default();
        }
        serde_json::from_value(value).unwrap_or_else(|err| {
            warn!("Offline settings malformed, using defaults: {err}");
            Settings::default()
        })
    }

    pub fn save(&mut self, settings: &Settings) -> Result<(), StoreError> {
        let value = serde_json::to_value(settings).map_err(|source| StoreError::Encode {
            key: SETTINGS_KEY.to_string(),
            source,
        })?;
        self.inner.set(SETTINGS_KEY, value)
    }
}
