//! Persisted user preferences.
//!
//! The pipeline only needs a couple of string values, so stores expose a
//! plain key/value interface. [`FileSettings`] keeps them in a TOML table,
//! [`MemorySettings`] backs tests and embedders that persist elsewhere.

use crate::error::{FvsError, Result};
use crate::utils::fs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const DOWNLOAD_DIR_KEY: &str = "download_dir";
pub const ACTIVATION_MODE_KEY: &str = "activation_mode";

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// `~/Downloads/flutter_sdk`
pub fn default_download_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join("Downloads").join("flutter_sdk"))
        .ok_or(FvsError::HomeDirectoryNotFound)
}

/// Reads the current download directory, persisting the default when unset.
pub fn download_dir(store: &dyn SettingsStore) -> Result<PathBuf> {
    if let Some(dir) = store.get(DOWNLOAD_DIR_KEY)?.filter(|d| !d.trim().is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let dir = default_download_dir()?;
    store.set(DOWNLOAD_DIR_KEY, &dir.to_string_lossy())?;
    Ok(dir)
}

pub fn set_download_dir(store: &dyn SettingsStore, dir: &Path) -> Result<()> {
    store.set(DOWNLOAD_DIR_KEY, &dir.to_string_lossy())
}

pub struct FileSettings {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSettings {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// `<config_dir>/fvs/settings.toml`
    pub fn open_default() -> Result<Self> {
        let dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or(FvsError::HomeDirectoryNotFound)?;
        Ok(Self::new(dir.join("fvs").join("settings.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<toml::Table> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        content.parse::<toml::Table>().map_err(|e| {
            FvsError::settings(format!("{} is not valid TOML: {e}", self.path.display()))
        })
    }

    fn save(&self, table: &toml::Table) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::ensure_dir_exists(parent)?;
        }
        let content = toml::to_string_pretty(table)
            .map_err(|e| FvsError::settings(format!("cannot serialize settings: {e}")))?;
        fs::write_atomic(&self.path, &content)
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let table = self.load()?;
        Ok(table
            .get(key)
            .and_then(|value| value.as_str())
            .map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = self.load()?;
        table.insert(key.to_string(), toml::Value::String(value.to_string()));
        self.save(&table)?;
        tracing::debug!("saved setting {key} to {}", self.path.display());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_download_dir(dir: &Path) -> Self {
        let settings = Self::new();
        settings
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(DOWNLOAD_DIR_KEY.to_string(), dir.to_string_lossy().into_owned());
        settings
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
