use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_format::AudioFormat;

/// Result returned by a file-producing backend when the stream is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub backend: String,
    pub file_path: PathBuf,
    pub data_bytes: u64,
    pub duration_secs: f64,
    pub checksum: String,
    pub metadata: RecordingMetadata,
}

/// Metadata stored next to a finalized recording.
///
/// Serializable for the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub stream_id: u32,
    pub file_path: String,
    pub format: AudioFormat,
    pub data_bytes: u64,
    pub duration_secs: f64,
    pub checksum: String,
    pub created_at: String,
}

impl RecordingMetadata {
    pub fn new(stream_id: u32, file_path: &str, format: AudioFormat, data_bytes: u64, checksum: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stream_id,
            file_path: file_path.to_string(),
            format,
            data_bytes,
            duration_secs: duration_of(format, data_bytes),
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Playback length of `data_bytes` of PCM in `format`.
pub fn duration_of(format: AudioFormat, data_bytes: u64) -> f64 {
    match format.avg_bytes_per_sec() {
        0 => 0.0,
        rate => data_bytes as f64 / rate as f64,
    }
}
