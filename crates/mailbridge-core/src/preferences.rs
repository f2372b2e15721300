//! Typed key-value preferences.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::Result;

/// Whether handles may fall back to a proxy.
pub const ALLOW_PROXY_KEY: &str = "allow_proxy";

/// Generic preference access. Missing keys read as empty, `false` or `0`.
pub trait PreferenceProvider: Send + Sync {
    /// Raw value of a key.
    fn get(&self, key: &str) -> String;

    /// Stores a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted. The previous value
    /// is kept in that case.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Boolean value of a key (`"true"` or `"1"`).
    fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key).as_str(), "true" | "1")
    }

    /// Integer value of a key.
    fn get_int(&self, key: &str) -> i64 {
        self.get(key).parse().unwrap_or(0)
    }

    /// Stores a boolean.
    ///
    /// # Errors
    ///
    /// See [`PreferenceProvider::set`].
    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, if value { "true" } else { "false" })
    }
}

/// In-memory preferences.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    /// Creates empty preferences.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceProvider for MemoryPreferences {
    fn get(&self, key: &str) -> String {
        self.values.read().get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Preferences stored as a JSON object, rewritten on every change.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl FilePreferences {
    /// Loads preferences from `path`. A missing file starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            BTreeMap::new()
        };

        info!("Loaded preferences from {}", path.display());
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl PreferenceProvider for FilePreferences {
    fn get(&self, key: &str) -> String {
        self.values.read().get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write();
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.save(&values) {
            warn!(key, "Failed to save preferences: {e}");
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}
