//! Persistent key/value settings.
//!
//! Modules read configuration through a [`SettingsStore`]; the engine
//! reads `module.<name>.enabled` flags from the same store. Keys are
//! flat strings, values are arbitrary JSON.
//!
//! Two backends ship with the crate: [`MemoryStore`] for tests and
//! embedders with their own persistence, and [`JsonFileStore`] backed by
//! a single JSON object on disk.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::SettingsError;

// ============================================================================
// Trait
// ============================================================================

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError>;

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError>;

    /// Typed read with a fallback for missing keys. A present key of the
    /// wrong type counts as missing; store errors still propagate.
    fn get_bool(&self, key: &str, default: bool) -> Result<bool, SettingsError> {
        Ok(match self.get(key)? {
            Some(Value::Bool(b)) => b,
            _ => default,
        })
    }

    /// Deserialize a key into a typed value, for modules keeping a config
    /// struct under one key. A present key that fails to deserialize is an
    /// error, not a default.
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a typed value under a key.
    fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError>
    where
        Self: Sized,
    {
        self.set(key, serde_json::to_value(value)?)
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// JSON file backend
// ============================================================================

/// Flat JSON object persisted to a single file. The whole object is kept
/// in memory; every `set` rewrites the file.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Opens an existing settings file or starts empty when the file does
    /// not exist yet. A file whose top level is not a JSON object is
    /// rejected rather than clobbered.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&raw)? {
                Value::Object(map) => map,
                _ => return Err(SettingsError::NotAnObject),
            }
        } else {
            Map::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<(), SettingsError> {
        let raw = serde_json::to_string_pretty(&Value::Object(entries.clone()))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }
}
