use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::backends::controls::SinkControls;
use crate::models::audio_format::AudioFormat;
use crate::models::error::SaveError;
use crate::models::recording_result::{RecordingMetadata, RecordingSummary};
use crate::processing::wav_format::{self, WAV_HEADER_SIZE};
use crate::storage::metadata;
use crate::traits::backend_sink::BackendSink;
use crate::traits::settings_store::SettingsStore;

/// Persists the stream as `<directory>/<prefix>_<stream_id>.wav`.
///
/// ## File life cycle
///
/// ```text
/// open      → append mode; empty file gets a placeholder header
/// write*    → raw PCM appended
/// finalize  → header rewritten with the real sizes, SHA-256 computed,
///             optional `.metadata.json` sidecar written
/// ```
///
/// The file is reopened in append mode whenever the engine reopens the
/// backend, so a stream split across several opens stays one recording.
/// In capture mode the same path is read back instead, skipping the header.
pub struct LocalFileBackend {
    name: String,
    directory: PathBuf,
    prefix: String,
    write_sidecar: bool,
    stream_id: u32,
    is_capture: bool,
    path: Option<PathBuf>,
    format: Option<AudioFormat>,
    file: Option<File>,
    data_bytes: u64,
    enabled: bool,
    controls: SinkControls,
}

impl LocalFileBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            name: "file".to_string(),
            directory: directory.into(),
            prefix: "stream".to_string(),
            write_sidecar: false,
            stream_id: 0,
            is_capture: false,
            path: None,
            format: None,
            file: None,
            data_bytes: 0,
            enabled: true,
            controls: SinkControls::new("file"),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn with_sidecar(mut self, enabled: bool) -> Self {
        self.write_sidecar = enabled;
        self
    }

    pub fn with_settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.controls.set_store(store);
        self
    }

    /// Target path, known once the backend is initialized.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// PCM bytes in the file, header excluded.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    fn require_path(&self) -> Result<PathBuf, SaveError> {
        self.path
            .clone()
            .ok_or_else(|| SaveError::io(&self.name, "backend used before initialize"))
    }

    fn open_for_capture(&mut self, path: &Path) -> Result<(), SaveError> {
        let mut file = File::open(path).map_err(|e| SaveError::io(&self.name, format!("open {}: {}", path.display(), e)))?;
        let mut header = [0u8; WAV_HEADER_SIZE];
        file.read_exact(&mut header)
            .map_err(|e| SaveError::io(&self.name, format!("read header: {}", e)))?;
        let (file_format, data_len) = wav_format::parse_wav_header(&header)?;
        if self.format.is_some_and(|f| f != file_format) {
            log::warn!(
                "{}: {} was recorded as {:?}, stream expects {:?}",
                self.name,
                path.display(),
                file_format,
                self.format
            );
        }
        self.data_bytes = u64::from(data_len);
        self.file = Some(file);
        Ok(())
    }

    fn open_for_playback(&mut self, path: &Path, overwrite: bool) -> Result<(), SaveError> {
        if overwrite {
            File::create(path).map_err(|e| SaveError::io(&self.name, format!("truncate {}: {}", path.display(), e)))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SaveError::io(&self.name, format!("open {}: {}", path.display(), e)))?;
        let len = file
            .metadata()
            .map_err(|e| SaveError::io(&self.name, e))?
            .len();

        self.file = Some(file);
        self.data_bytes = len.saturating_sub(WAV_HEADER_SIZE as u64);
        if len == 0 {
            self.write_header()?;
        }
        Ok(())
    }
}

impl BackendSink for LocalFileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, stream_id: u32, is_capture: bool) -> Result<(), SaveError> {
        self.close();
        fs::create_dir_all(&self.directory).map_err(|e| SaveError::BackendInit {
            backend: self.name.clone(),
            reason: format!("failed to create directory: {}", e),
        })?;

        self.stream_id = stream_id;
        self.is_capture = is_capture;
        self.data_bytes = 0;
        self.path = Some(self.directory.join(format!("{}_{}.wav", self.prefix, stream_id)));
        Ok(())
    }

    fn set_format(&mut self, format: &AudioFormat) -> Result<(), SaveError> {
        self.format = Some(*format);
        Ok(())
    }

    fn disable(&mut self, disabled: bool) -> Result<(), SaveError> {
        self.enabled = !disabled;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn open(&mut self, overwrite: bool) -> Result<(), SaveError> {
        if self.file.is_some() {
            return Ok(());
        }
        let path = self.require_path()?;
        if self.is_capture {
            self.open_for_capture(&path)
        } else {
            self.open_for_playback(&path, overwrite)
        }
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                log::warn!("{}: flush on close failed: {}", self.name, e);
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SaveError> {
        if self.is_capture {
            return Err(SaveError::io(&self.name, "capture stream is read-only"));
        }
        let file = self.file.as_mut().ok_or_else(|| SaveError::NotOpen(self.name.clone()))?;
        file.write_all(bytes).map_err(|e| SaveError::io(&self.name, e))?;
        self.data_bytes += bytes.len() as u64;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SaveError> {
        if !self.is_capture {
            return Ok(0);
        }
        let file = self.file.as_mut().ok_or_else(|| SaveError::NotOpen(self.name.clone()))?;
        file.read(buf).map_err(|e| SaveError::io(&self.name, e))
    }

    /// Write a placeholder header if the file is still empty.
    fn write_header(&mut self) -> Result<(), SaveError> {
        if self.is_capture {
            return Ok(());
        }
        let format = self
            .format
            .ok_or_else(|| SaveError::InvalidFormat("header requested before a format was set".into()))?;
        let file = self.file.as_mut().ok_or_else(|| SaveError::NotOpen(self.name.clone()))?;
        let len = file.metadata().map_err(|e| SaveError::io(&self.name, e))?.len();
        if len == 0 {
            file.write_all(&wav_format::generate_wav_header(&format, 0))
                .map_err(|e| SaveError::io(&self.name, e))?;
        }
        Ok(())
    }

    /// Rewrite the header with the final sizes and checksum the file.
    fn finalize(&mut self) -> Result<Option<RecordingSummary>, SaveError> {
        self.close();
        if self.is_capture {
            return Ok(None);
        }
        let (Some(path), Some(format)) = (self.path.clone(), self.format) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| SaveError::StorageError(format!("failed to reopen {}: {}", path.display(), e)))?;
        let len = file
            .metadata()
            .map_err(|e| SaveError::StorageError(e.to_string()))?
            .len();
        let data_bytes = len.saturating_sub(WAV_HEADER_SIZE as u64);

        file.seek(SeekFrom::Start(0))
            .map_err(|e| SaveError::StorageError(e.to_string()))?;
        file.write_all(&wav_format::generate_wav_header(&format, data_bytes))
            .map_err(|e| SaveError::StorageError(format!("failed to rewrite header: {}", e)))?;
        file.sync_all().map_err(|e| SaveError::StorageError(e.to_string()))?;
        drop(file);
        self.data_bytes = data_bytes;

        let checksum = sha256_file(&path)?;
        let metadata = RecordingMetadata::new(self.stream_id, &path.to_string_lossy(), format, data_bytes, &checksum);
        if self.write_sidecar {
            metadata::write_metadata(&metadata, &path)?;
        }
        log::info!(
            "{}: finalized {} ({} data bytes, {:.2}s)",
            self.name,
            path.display(),
            data_bytes,
            metadata.duration_secs
        );

        Ok(Some(RecordingSummary {
            backend: self.name.clone(),
            file_path: path,
            data_bytes,
            duration_secs: metadata.duration_secs,
            checksum,
            metadata,
        }))
    }

    fn controls(&mut self) -> &mut SinkControls {
        &mut self.controls
    }
}

/// SHA-256 hex digest of a file, streamed in 64 KiB blocks.
fn sha256_file(path: &Path) -> Result<String, SaveError> {
    let mut file =
        File::open(path).map_err(|e| SaveError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    let mut block = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut block)
            .map_err(|e| SaveError::StorageError(format!("failed to read file for checksum: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    fn playback_backend(dir: &Path) -> LocalFileBackend {
        let mut backend = LocalFileBackend::new(dir).with_sidecar(true);
        backend.initialize(5, false).unwrap();
        backend.set_format(&AudioFormat::pcm(2, 16, 48000)).unwrap();
        backend
    }

    #[test]
    fn path_follows_prefix_and_stream_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = LocalFileBackend::new(dir.path()).with_prefix("mic");
        backend.initialize(9, false).unwrap();
        assert_eq!(backend.path().unwrap(), dir.path().join("mic_9.wav"));
    }

    #[test]
    fn open_writes_placeholder_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = playback_backend(dir.path());
        backend.open(true).unwrap();
        backend.write_header().unwrap();
        backend.close();

        let bytes = fs::read(backend.path().unwrap()).unwrap();
        assert_eq!(bytes.len(), 44);
        assert_eq!(u32_at(&bytes, 40), 0);
    }

    #[test]
    fn finalize_corrects_header_and_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = playback_backend(dir.path());
        backend.open(true).unwrap();
        backend.write(&[1u8; 100]).unwrap();
        backend.write(&[2u8; 60]).unwrap();

        let summary = backend.finalize().unwrap().unwrap();
        assert_eq!(summary.data_bytes, 160);
        assert_eq!(summary.checksum.len(), 64);
        assert!(!backend.is_open());

        let bytes = fs::read(&summary.file_path).unwrap();
        assert_eq!(bytes.len(), 44 + 160);
        assert_eq!(u32_at(&bytes, 4), 36 + 160);
        assert_eq!(u32_at(&bytes, 40), 160);
        assert_eq!(&bytes[44..144], &[1u8; 100][..]);

        let sidecar = metadata::read_metadata(&summary.file_path).unwrap();
        assert_eq!(sidecar.checksum, summary.checksum);
        assert_eq!(sidecar.stream_id, 5);
    }

    #[test]
    fn reopen_appends_to_same_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = playback_backend(dir.path());
        backend.open(true).unwrap();
        backend.write(&[1u8; 10]).unwrap();
        backend.close();

        backend.open(false).unwrap();
        assert_eq!(backend.data_bytes(), 10);
        backend.write(&[2u8; 10]).unwrap();

        let summary = backend.finalize().unwrap().unwrap();
        assert_eq!(summary.data_bytes, 20);
    }

    #[test]
    fn overwrite_discards_previous_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = playback_backend(dir.path());
        backend.open(true).unwrap();
        backend.write(&[1u8; 10]).unwrap();
        backend.close();

        backend.open(true).unwrap();
        assert_eq!(backend.data_bytes(), 0);
        backend.close();
        assert_eq!(fs::metadata(backend.path().unwrap()).unwrap().len(), 44);
    }

    #[test]
    fn write_requires_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = playback_backend(dir.path());
        assert_eq!(backend.write(&[0u8; 4]), Err(SaveError::NotOpen("file".into())));
    }

    #[test]
    fn capture_reads_data_after_header() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::pcm(1, 16, 16000);
        let path = dir.path().join("stream_2.wav");
        let mut contents = wav_format::generate_wav_header(&format, 6).to_vec();
        contents.extend_from_slice(&[10, 11, 12, 13, 14, 15]);
        fs::write(&path, contents).unwrap();

        let mut backend = LocalFileBackend::new(dir.path());
        backend.initialize(2, true).unwrap();
        backend.set_format(&format).unwrap();
        backend.open(false).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(backend.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], &[10, 11, 12, 13, 14, 15]);
        assert_eq!(backend.read(&mut buf).unwrap(), 0);
        assert!(backend.write(&[1]).is_err());
        assert_eq!(backend.finalize().unwrap(), None);
    }

    #[test]
    fn capture_rejects_corrupt_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut header = wav_format::generate_wav_header(&AudioFormat::default(), 0);
        header[22..24].copy_from_slice(&u16::MAX.to_le_bytes());
        header[24..28].copy_from_slice(&u32::MAX.to_le_bytes());
        fs::write(dir.path().join("stream_3.wav"), header).unwrap();

        let mut backend = LocalFileBackend::new(dir.path());
        backend.initialize(3, true).unwrap();
        assert!(matches!(backend.open(false), Err(SaveError::StorageError(_))));
        assert!(!backend.is_open());
    }
}
