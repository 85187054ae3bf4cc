use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::models::error::SaveError;
use crate::traits::settings_store::SettingsStore;

type Scopes = BTreeMap<String, BTreeMap<String, i64>>;

/// Process-local settings, lost on exit.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<Scopes>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self, scope: &str, key: &str) -> Option<i64> {
        self.values.lock().get(scope).and_then(|keys| keys.get(key)).copied()
    }

    fn store(&self, scope: &str, key: &str, value: i64) -> Result<(), SaveError> {
        self.values
            .lock()
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings kept in a JSON document on disk, rewritten on every change.
///
/// ```text
/// { "file": { "volume.0": -6, "mute": 0 }, "network": { ... } }
/// ```
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<Scopes>,
}

impl JsonFileSettings {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self, SaveError> {
        let values = if path.exists() {
            let json = fs::read_to_string(path)
                .map_err(|e| SaveError::StorageError(format!("failed to read settings: {}", e)))?;
            serde_json::from_str(&json)
                .map_err(|e| SaveError::StorageError(format!("failed to parse settings: {}", e)))?
        } else {
            Scopes::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &Scopes) -> Result<(), SaveError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SaveError::StorageError(format!("failed to create directory: {}", e)))?;
        }
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| SaveError::StorageError(format!("failed to serialize settings: {}", e)))?;
        fs::write(&self.path, json)
            .map_err(|e| SaveError::StorageError(format!("failed to write settings: {}", e)))
    }
}

impl SettingsStore for JsonFileSettings {
    fn load(&self, scope: &str, key: &str) -> Option<i64> {
        self.values.lock().get(scope).and_then(|keys| keys.get(key)).copied()
    }

    fn store(&self, scope: &str, key: &str, value: i64) -> Result<(), SaveError> {
        let mut values = self.values.lock();
        values
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_settings_are_scoped() {
        let settings = MemorySettings::new();
        settings.store("a", "volume.0", 5).unwrap();
        assert_eq!(settings.load("a", "volume.0"), Some(5));
        assert_eq!(settings.load("b", "volume.0"), None);
    }

    #[test]
    fn json_settings_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = JsonFileSettings::open(&path).unwrap();
        settings.store("file", "volume.0", -6).unwrap();
        settings.store("file", "mute", 1).unwrap();

        let reopened = JsonFileSettings::open(&path).unwrap();
        assert_eq!(reopened.load("file", "volume.0"), Some(-6));
        assert_eq!(reopened.load("file", "mute"), Some(1));
    }

    #[test]
    fn corrupt_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert!(JsonFileSettings::open(&path).is_err());
    }
}
