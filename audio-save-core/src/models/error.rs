use std::time::Duration;

use thiserror::Error;

/// Errors returned by the save engine, its ring buffer and its backends.
///
/// Buffer overruns are deliberately absent: dropped bytes are counted in
/// [`EngineStats`](super::stats::EngineStats), never raised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SaveError {
    #[error("ring buffer capacity must be a non-zero power of two, got {0}")]
    InvalidCapacity(usize),

    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    #[error("no backend could be initialized")]
    AllInitFailed,

    #[error("no backend accepted the request")]
    NoBackendAccepted,

    #[error("engine is not initialized")]
    NotInitialized,

    #[error("backend {backend} failed to initialize: {reason}")]
    BackendInit { backend: String, reason: String },

    #[error("backend {backend} I/O failed: {reason}")]
    BackendIo { backend: String, reason: String },

    #[error("backend {backend} rejected state change: {reason}")]
    StateRejected { backend: String, reason: String },

    #[error("backend {0} is not open")]
    NotOpen(String),

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("drain did not complete within {0:?}")]
    DrainTimeout(Duration),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl SaveError {
    /// Shorthand for wrapping an I/O failure of a named backend.
    pub fn io(backend: &str, err: impl std::fmt::Display) -> Self {
        Self::BackendIo {
            backend: backend.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_helper_keeps_backend_name() {
        let err = SaveError::io("file", "disk full");
        assert_eq!(err.to_string(), "backend file I/O failed: disk full");
    }

    #[test]
    fn capacity_message_includes_value() {
        assert!(SaveError::InvalidCapacity(1000).to_string().contains("1000"));
    }
}
