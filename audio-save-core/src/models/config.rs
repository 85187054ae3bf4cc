use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SaveError;

/// Default ring buffer size: 2 MiB, already a power of two.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048 * 1024;

/// Configuration for a save engine.
///
/// Loadable from JSON; missing fields fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identifier handed to every backend (used in file names).
    pub stream_id: u32,

    /// Bytes per delivery. `None` derives 10 ms from the stream format.
    pub transfer_chunk_size: Option<usize>,

    /// How many consecutive short-chunk flushes may be deferred before a
    /// partial chunk is delivered anyway (default: 2).
    pub flush_tolerance: u32,

    /// Upper bound for `drain` (default: 5000 ms).
    pub drain_timeout_ms: u64,

    /// Maximum bytes pulled from a backend per capture refill (default: 8192).
    pub capture_read_limit: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.transfer_chunk_size == Some(0) {
            return Err("transfer chunk size must be positive".into());
        }
        if self.drain_timeout_ms == 0 {
            return Err("drain timeout must be positive".into());
        }
        if self.capture_read_limit == 0 {
            return Err("capture read limit must be positive".into());
        }
        Ok(())
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, SaveError> {
        let json = fs::read_to_string(path)
            .map_err(|e| SaveError::ConfigurationFailed(format!("failed to read config: {}", e)))?;
        let config: EngineConfig = serde_json::from_str(&json)
            .map_err(|e| SaveError::ConfigurationFailed(format!("failed to parse config: {}", e)))?;
        config.validate().map_err(SaveError::ConfigurationFailed)?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_id: 0,
            transfer_chunk_size: None,
            flush_tolerance: 2,
            drain_timeout_ms: 5000,
            capture_read_limit: 8192,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_tolerance, 2);
        assert!(DEFAULT_BUFFER_CAPACITY.is_power_of_two());
    }

    #[test]
    fn zero_chunk_override_is_rejected() {
        let config = EngineConfig {
            transfer_chunk_size: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{ "stream_id": 7, "flush_tolerance": 4 }"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.stream_id, 7);
        assert_eq!(config.flush_tolerance, 4);
        assert_eq!(config.capture_read_limit, 8192);
    }

    #[test]
    fn invalid_json_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ stream_id").unwrap();

        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(SaveError::ConfigurationFailed(_))
        ));
    }
}
