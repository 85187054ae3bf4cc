use crate::backends::controls::SinkControls;
use crate::models::audio_format::AudioFormat;
use crate::models::error::SaveError;
use crate::models::recording_result::RecordingSummary;
use crate::models::state::StreamState;

/// A destination for the persisted stream (file, socket, device, ...).
///
/// Backends are registered with the engine before the stream is set up and
/// are driven from two places:
///
/// - the control path (`initialize`, `set_format`, `set_state`, volume, mute),
///   called from the thread that owns the engine;
/// - the delivery path (`open`, `write`, `read`), called from the flush
///   worker with transfer-chunk sized slices.
///
/// Both paths hold the engine's backend lock, so implementations never see
/// concurrent calls. `write` may block; the producer never waits on it.
pub trait BackendSink: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Bind the backend to a stream. Called once per `SaveEngine::initialize`.
    fn initialize(&mut self, stream_id: u32, is_capture: bool) -> Result<(), SaveError>;

    /// Store a private copy of the stream format.
    fn set_format(&mut self, format: &AudioFormat) -> Result<(), SaveError>;

    fn set_state(&mut self, _state: StreamState) -> Result<(), SaveError> {
        Ok(())
    }

    /// Disabled backends are skipped by the delivery path.
    fn disable(&mut self, disabled: bool) -> Result<(), SaveError>;

    fn is_enabled(&self) -> bool;

    fn is_open(&self) -> bool;

    /// Acquire the underlying resource. Must be idempotent; `overwrite`
    /// discards whatever a previous stream left behind.
    fn open(&mut self, overwrite: bool) -> Result<(), SaveError>;

    /// Release the underlying resource. Safe to call when not open.
    fn close(&mut self);

    /// Persist one slice of the stream.
    fn write(&mut self, bytes: &[u8]) -> Result<(), SaveError>;

    /// Capture direction: fill `buf` with stream data, returning the count.
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, SaveError> {
        Ok(0)
    }

    /// Emit whatever preamble the medium needs (a placeholder WAV header).
    fn write_header(&mut self) -> Result<(), SaveError> {
        Ok(())
    }

    /// Tear the stream down. File-producing backends return a summary.
    fn finalize(&mut self) -> Result<Option<RecordingSummary>, SaveError> {
        self.close();
        Ok(None)
    }

    /// Volume and mute bookkeeping shared by all backends.
    fn controls(&mut self) -> &mut SinkControls;

    fn set_volume(&mut self, channel: u32, volume: i32) -> Result<(), SaveError> {
        self.controls().set_volume(channel, volume)
    }

    fn get_volume(&mut self, channel: u32) -> i32 {
        self.controls().volume(channel)
    }

    fn set_mute(&mut self, mute: bool) -> Result<(), SaveError> {
        self.controls().set_mute(mute)
    }

    fn get_mute(&mut self) -> bool {
        self.controls().muted()
    }
}
