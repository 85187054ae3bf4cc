use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backends::controls::SinkControls;
use crate::models::audio_format::AudioFormat;
use crate::models::error::SaveError;
use crate::models::recording_result::RecordingSummary;
use crate::models::state::StreamState;
use crate::traits::backend_sink::BackendSink;

#[derive(Debug, Default)]
struct TapState {
    bytes: Vec<u8>,
    write_calls: usize,
    open_calls: usize,
    formats: Vec<AudioFormat>,
    states: Vec<StreamState>,
    finalized: bool,
    capture: VecDeque<u8>,
}

/// Cloneable view into a [`MemoryBackend`] that stays usable after the
/// backend has been handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryTap {
    inner: Arc<Mutex<TapState>>,
}

impl MemoryTap {
    /// Everything delivered so far, in order.
    pub fn bytes(&self) -> Vec<u8> {
        self.inner.lock().bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().bytes.is_empty()
    }

    pub fn write_calls(&self) -> usize {
        self.inner.lock().write_calls
    }

    pub fn open_calls(&self) -> usize {
        self.inner.lock().open_calls
    }

    pub fn formats(&self) -> Vec<AudioFormat> {
        self.inner.lock().formats.clone()
    }

    pub fn states(&self) -> Vec<StreamState> {
        self.inner.lock().states.clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.lock().finalized
    }

    /// Queue bytes to be served by `read` in capture mode.
    pub fn push_capture(&self, bytes: &[u8]) {
        self.inner.lock().capture.extend(bytes);
    }
}

/// In-process backend that keeps the stream in memory.
///
/// Serves as a monitoring tap next to real backends and as the capture
/// source when a stream is fed programmatically.
pub struct MemoryBackend {
    name: String,
    tap: MemoryTap,
    enabled: bool,
    open: bool,
    controls: SinkControls,
}

impl MemoryBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tap: MemoryTap::default(),
            enabled: true,
            open: false,
            controls: SinkControls::new(name),
        }
    }

    pub fn tap(&self) -> MemoryTap {
        self.tap.clone()
    }
}

impl BackendSink for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _stream_id: u32, _is_capture: bool) -> Result<(), SaveError> {
        let mut tap = self.tap.inner.lock();
        tap.bytes.clear();
        tap.finalized = false;
        Ok(())
    }

    fn set_format(&mut self, format: &AudioFormat) -> Result<(), SaveError> {
        self.tap.inner.lock().formats.push(*format);
        Ok(())
    }

    fn set_state(&mut self, state: StreamState) -> Result<(), SaveError> {
        self.tap.inner.lock().states.push(state);
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
        self.open
    }

    fn open(&mut self, overwrite: bool) -> Result<(), SaveError> {
        let mut tap = self.tap.inner.lock();
        tap.open_calls += 1;
        if overwrite {
            tap.bytes.clear();
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SaveError> {
        if !self.open {
            return Err(SaveError::NotOpen(self.name.clone()));
        }
        let mut tap = self.tap.inner.lock();
        tap.bytes.extend_from_slice(bytes);
        tap.write_calls += 1;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SaveError> {
        let mut tap = self.tap.inner.lock();
        let n = buf.len().min(tap.capture.len());
        for (slot, byte) in buf.iter_mut().zip(tap.capture.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn finalize(&mut self) -> Result<Option<RecordingSummary>, SaveError> {
        self.close();
        self.tap.inner.lock().finalized = true;
        Ok(None)
    }

    fn controls(&mut self) -> &mut SinkControls {
        &mut self.controls
    }
}
