use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::SaveError;
use crate::models::recording_result::RecordingMetadata;

/// `{recording}.metadata.json`, next to the recording.
pub fn sidecar_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("metadata.json")
}

/// Write recording metadata as a JSON sidecar. Returns the sidecar path.
pub fn write_metadata(metadata: &RecordingMetadata, recording_path: &Path) -> Result<PathBuf, SaveError> {
    let path = sidecar_path(recording_path);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| SaveError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&path, json).map_err(|e| SaveError::StorageError(format!("failed to write metadata: {}", e)))?;
    Ok(path)
}

pub fn read_metadata(recording_path: &Path) -> Result<RecordingMetadata, SaveError> {
    let json = fs::read_to_string(sidecar_path(recording_path))
        .map_err(|e| SaveError::StorageError(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| SaveError::StorageError(format!("failed to parse metadata: {}", e)))
}
