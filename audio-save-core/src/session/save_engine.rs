use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_format::AudioFormat;
use crate::models::config::EngineConfig;
use crate::models::error::SaveError;
use crate::models::recording_result::RecordingSummary;
use crate::models::state::StreamState;
use crate::models::stats::{EngineStats, StatsCounters};
use crate::processing::ring_buffer::RingBuffer;
use crate::session::flush_scheduler::FlushScheduler;
use crate::traits::backend_sink::BackendSink;
use crate::traits::save_delegate::SaveDelegate;

/// Outcome of one consumer-side flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub bytes_delivered: usize,
    pub chunks: usize,
    /// The flush stopped early to let a short chunk fill up.
    pub deferred: bool,
}

struct Registered {
    sink: Box<dyn BackendSink>,
    /// Initialized for the current stream.
    active: bool,
}

/// State shared by the engine handle and the flush worker.
struct EngineShared {
    backends: Mutex<Vec<Registered>>,
    stats: StatsCounters,
    delegate: Mutex<Option<Arc<dyn SaveDelegate>>>,
    disabled: AtomicBool,
    state: Mutex<StreamState>,
}

impl EngineShared {
    fn delegate(&self) -> Option<Arc<dyn SaveDelegate>> {
        self.delegate.lock().clone()
    }

    /// Hand one chunk to every active, enabled backend in registration
    /// order, opening lazily. Failures are reported after the backend lock
    /// is released and never stop the fan-out.
    fn deliver(&self, chunk: &[u8]) {
        let mut failures = Vec::new();
        {
            let mut backends = self.backends.lock();
            for entry in backends.iter_mut().filter(|e| e.active && e.sink.is_enabled()) {
                let sink = &mut entry.sink;
                let result = if sink.is_open() {
                    Ok(())
                } else {
                    sink.open(false)
                };
                if let Err(e) = result.and_then(|_| sink.write(chunk)) {
                    failures.push((sink.name().to_string(), e));
                }
            }
        }
        for (name, err) in failures {
            self.backend_failed(&name, &err);
        }
    }

    /// Capture refill: the first backend that produces data wins.
    fn fetch(&self, buf: &mut [u8]) -> usize {
        let mut failures = Vec::new();
        let mut filled = 0;
        {
            let mut backends = self.backends.lock();
            for entry in backends.iter_mut().filter(|e| e.active && e.sink.is_enabled()) {
                let sink = &mut entry.sink;
                let result = if sink.is_open() {
                    Ok(())
                } else {
                    sink.open(false)
                };
                match result.and_then(|_| sink.read(buf)) {
                    Ok(0) => continue,
                    Ok(n) => {
                        filled = n.min(buf.len());
                        break;
                    }
                    Err(e) => failures.push((sink.name().to_string(), e)),
                }
            }
        }
        for (name, err) in failures {
            self.backend_failed(&name, &err);
        }
        filled
    }

    fn backend_failed(&self, name: &str, err: &SaveError) {
        log::error!("Backend {} failed: {}", name, err);
        StatsCounters::add(&self.stats.backend_failures, 1);
        if let Some(delegate) = self.delegate() {
            delegate.on_backend_error(name, err);
        }
    }

    /// Surface drops counted by the producer since the last report.
    fn report_overruns(&self) {
        let dropped = self.stats.bytes_dropped.load(Ordering::Relaxed);
        let reported = self.stats.reported_drops.swap(dropped, Ordering::Relaxed);
        if dropped > reported {
            log::warn!(
                "Ring buffer overrun: {} bytes dropped ({} total)",
                dropped - reported,
                dropped
            );
            if let Some(delegate) = self.delegate() {
                delegate.on_overrun(dropped);
            }
        }
    }
}

/// Consumer-side bookkeeping, only touched under the flush lock.
struct FlushState {
    transfer_chunk_size: usize,
    tolerance: u32,
    tolerance_cap: u32,
    /// Capture refill staging area.
    scratch: Vec<u8>,
}

/// One initialized stream: the ring plus everything the consumer needs.
struct Stream {
    ring: RingBuffer,
    is_capture: bool,
    chunk_override: Option<usize>,
    flush: Mutex<FlushState>,
    shared: Arc<EngineShared>,
}

impl Stream {
    /// Entry point of the flush worker.
    fn run(&self, force: bool) {
        StatsCounters::add(&self.shared.stats.flush_runs, 1);
        if self.is_capture {
            self.receive_data();
        } else {
            self.send_data(force);
        }
        self.shared.report_overruns();
    }

    /// Drain the ring into the backends, one transfer chunk at a time.
    ///
    /// A chunk never crosses the ring's wrap point. Without `force`, a chunk
    /// shorter than the transfer size (a short tail or a run cut by the
    /// wrap) is held back so the backends see fewer, larger writes.
    /// Consecutive hold-backs are counted across calls; once the count
    /// passes the cap the short chunk is delivered anyway.
    fn send_data(&self, force: bool) -> FlushReport {
        let mut flush = self.flush.lock();
        let mut report = FlushReport::default();

        loop {
            let chunk_size = flush.transfer_chunk_size;
            let chunk = chunk_size.min(self.ring.contiguous_available());
            if chunk == 0 {
                break;
            }

            if chunk < chunk_size && !force {
                flush.tolerance += 1;
                if flush.tolerance <= flush.tolerance_cap {
                    report.deferred = true;
                    break;
                }
            }
            flush.tolerance = 0;

            let delivered = self.ring.consume(chunk, |run| {
                self.shared.deliver(run);
                run.len()
            });
            if delivered == 0 {
                break;
            }
            report.bytes_delivered += delivered;
            report.chunks += 1;
        }

        StatsCounters::add(&self.shared.stats.bytes_delivered, report.bytes_delivered);
        if report.chunks > 0 {
            log::trace!(
                "Flushed {} bytes in {} chunks (force: {})",
                report.bytes_delivered,
                report.chunks,
                force
            );
        }
        report
    }

    /// Top the ring up from the backends.
    fn receive_data(&self) -> usize {
        let mut flush = self.flush.lock();
        let want = self.ring.free().min(flush.scratch.len());
        if want == 0 {
            return 0;
        }

        let scratch = &mut flush.scratch[..want];
        let fetched = self.shared.fetch(scratch);
        let stored = self.ring.write(&scratch[..fetched]);
        StatsCounters::add(&self.shared.stats.bytes_captured, stored);
        if stored < fetched {
            StatsCounters::add(&self.shared.stats.bytes_dropped, fetched - stored);
            StatsCounters::add(&self.shared.stats.overrun_events, 1);
        }
        stored
    }

    fn apply_format(&self, format: &AudioFormat) {
        if self.chunk_override.is_none() {
            let chunk = format.transfer_chunk_size().min(self.ring.capacity());
            self.flush.lock().transfer_chunk_size = chunk;
        }
    }
}

/// Never-blocking persistence engine for one PCM stream.
///
/// The producer pushes bytes with [`write_data`](Self::write_data), which
/// only copies into a non-blocking ring and pokes the flush worker. The worker
/// drains the ring in transfer-chunk sized pieces and fans each piece out to
/// every registered backend, so a slow or broken backend delays only the
/// worker, never the producer.
///
/// ```text
/// write_data ─→ [RingBuffer] ─→ FlushScheduler ─→ send_data ─┬→ LocalFileBackend
///    (producer)                   (worker thread)             ├→ NetworkBackend
///                                                             └→ VirtualDeviceBackend
/// ```
///
/// In capture mode the direction flips: the worker pulls from the backends
/// into the ring and [`read_data`](Self::read_data) serves the caller.
///
/// Lifecycle: `new → add_backend* → initialize → … → drain → close`.
/// Every data-path call before `initialize` fails with `NotInitialized`.
pub struct SaveEngine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    stream: Option<Arc<Stream>>,
    scheduler: Option<FlushScheduler>,
    format: Mutex<Option<AudioFormat>>,
}

impl SaveEngine {
    pub fn new(config: EngineConfig) -> Result<Self, SaveError> {
        config.validate().map_err(SaveError::ConfigurationFailed)?;
        Ok(Self {
            config,
            shared: Arc::new(EngineShared {
                backends: Mutex::new(Vec::new()),
                stats: StatsCounters::default(),
                delegate: Mutex::new(None),
                disabled: AtomicBool::new(false),
                state: Mutex::new(StreamState::Stopped),
            }),
            stream: None,
            scheduler: None,
            format: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stream_id(&self) -> u32 {
        self.config.stream_id
    }

    pub fn set_delegate(&self, delegate: Arc<dyn SaveDelegate>) {
        *self.shared.delegate.lock() = Some(delegate);
    }

    pub fn is_initialized(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_capture(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_capture)
    }

    pub fn state(&self) -> StreamState {
        *self.shared.state.lock()
    }

    pub fn format(&self) -> Option<AudioFormat> {
        *self.format.lock()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats.snapshot()
    }

    /// Bytes per delivery for the current stream.
    pub fn transfer_chunk_size(&self) -> Option<usize> {
        self.stream.as_ref().map(|s| s.flush.lock().transfer_chunk_size)
    }

    /// Bytes waiting in the ring.
    pub fn buffered(&self) -> usize {
        self.stream.as_ref().map_or(0, |s| s.ring.available())
    }

    pub fn backend_count(&self) -> usize {
        self.shared.backends.lock().len()
    }

    /// Register a backend. Registered before `initialize`, it is set up with
    /// the stream; registered later, it joins the running stream at once.
    pub fn add_backend(&self, mut sink: Box<dyn BackendSink>) {
        let mut active = false;
        if let (Some(stream), Some(format)) = (self.stream.as_ref(), self.format()) {
            let joined = sink
                .initialize(self.config.stream_id, stream.is_capture)
                .and_then(|_| sink.set_format(&format));
            match joined {
                Ok(()) => active = true,
                Err(e) => log::warn!("Backend {} could not join stream: {}", sink.name(), e),
            }
        }
        log::debug!("Registered backend {}", sink.name());
        self.shared.backends.lock().push(Registered { sink, active });
    }

    /// Close and drop every backend.
    pub fn remove_all_backends(&self) {
        let mut backends = self.shared.backends.lock();
        for entry in backends.iter_mut() {
            entry.sink.close();
        }
        backends.clear();
    }

    /// Set up a stream: allocate the ring, bring up the backends and start
    /// the flush worker.
    ///
    /// Succeeds when at least one backend initialized; the others are
    /// logged and left out of this stream. An already initialized engine is
    /// closed first.
    pub fn initialize(&mut self, format: AudioFormat, is_capture: bool, buffer_capacity: usize) -> Result<(), SaveError> {
        format.validate()?;
        if self.stream.is_some() {
            self.close()?;
        }

        let ring = RingBuffer::new(buffer_capacity)?;
        let transfer_chunk_size = self
            .config
            .transfer_chunk_size
            .unwrap_or_else(|| format.transfer_chunk_size())
            .min(buffer_capacity);
        let mut scratch = Vec::new();
        if is_capture {
            scratch
                .try_reserve_exact(self.config.capture_read_limit)
                .map_err(|e| SaveError::AllocationFailure(format!("capture staging buffer: {}", e)))?;
            scratch.resize(self.config.capture_read_limit, 0);
        }

        self.bring_up_backends(&format, is_capture)?;

        let stream = Arc::new(Stream {
            ring,
            is_capture,
            chunk_override: self.config.transfer_chunk_size,
            flush: Mutex::new(FlushState {
                transfer_chunk_size,
                tolerance: 0,
                tolerance_cap: self.config.flush_tolerance,
                scratch,
            }),
            shared: Arc::clone(&self.shared),
        });

        let job_stream = Arc::clone(&stream);
        let scheduler = FlushScheduler::start("audio-save-flush", Box::new(move |force| job_stream.run(force)))?;
        if is_capture {
            scheduler.request_flush(false);
        }

        *self.format.lock() = Some(format);
        self.stream = Some(stream);
        self.scheduler = Some(scheduler);
        log::info!(
            "Stream {} initialized ({}): {} byte ring, {} byte chunks, {} backends",
            self.config.stream_id,
            if is_capture { "capture" } else { "playback" },
            buffer_capacity,
            transfer_chunk_size,
            self.backend_count()
        );
        Ok(())
    }

    fn bring_up_backends(&self, format: &AudioFormat, is_capture: bool) -> Result<(), SaveError> {
        let mut backends = self.shared.backends.lock();
        let mut initialized = 0;
        for entry in backends.iter_mut() {
            let sink = &mut entry.sink;
            let result = sink
                .initialize(self.config.stream_id, is_capture)
                .and_then(|_| sink.set_format(format));
            entry.active = result.is_ok();
            match result {
                Ok(()) => initialized += 1,
                Err(e) => log::warn!("Skipping backend {}: {}", sink.name(), e),
            }
        }
        if initialized == 0 {
            return Err(SaveError::AllInitFailed);
        }

        for entry in backends.iter_mut().filter(|e| e.active && e.sink.is_enabled()) {
            let sink = &mut entry.sink;
            if let Err(e) = sink.open(true).and_then(|_| sink.write_header()) {
                log::warn!("Backend {} not opened at setup, retrying on first write: {}", sink.name(), e);
            }
        }
        Ok(())
    }

    fn stream(&self) -> Result<&Arc<Stream>, SaveError> {
        self.stream.as_ref().ok_or(SaveError::NotInitialized)
    }

    /// Replace the stream format on every backend.
    pub fn set_format(&self, format: AudioFormat) -> Result<(), SaveError> {
        let stream = self.stream()?;
        format.validate()?;

        let mut accepted = 0;
        {
            let mut backends = self.shared.backends.lock();
            for entry in backends.iter_mut().filter(|e| e.active) {
                match entry.sink.set_format(&format) {
                    Ok(()) => accepted += 1,
                    Err(e) => log::warn!("Backend {} rejected format: {}", entry.sink.name(), e),
                }
            }
        }
        if accepted == 0 {
            return Err(SaveError::NoBackendAccepted);
        }

        stream.apply_format(&format);
        *self.format.lock() = Some(format);
        Ok(())
    }

    /// Forward a state transition. The first backend that refuses aborts
    /// the fan-out; later backends are not called.
    pub fn set_state(&self, state: StreamState) -> Result<(), SaveError> {
        self.stream()?;
        {
            let mut backends = self.shared.backends.lock();
            for entry in backends.iter_mut().filter(|e| e.active) {
                entry.sink.set_state(state).map_err(|e| match e {
                    SaveError::StateRejected { .. } => e,
                    other => SaveError::StateRejected {
                        backend: entry.sink.name().to_string(),
                        reason: other.to_string(),
                    },
                })?;
            }
        }

        *self.shared.state.lock() = state;
        log::debug!("Stream {} state: {:?}", self.config.stream_id, state);
        if let Some(delegate) = self.shared.delegate() {
            delegate.on_state_changed(state);
        }
        Ok(())
    }

    /// Producer entry point. Copies what fits into the ring and returns the
    /// number of bytes accepted; the rest is dropped and counted as overrun.
    ///
    /// Never blocks and never performs I/O. Capture engines and disabled
    /// engines accept nothing.
    pub fn write_data(&self, bytes: &[u8]) -> Result<usize, SaveError> {
        let stream = self.stream()?;
        if stream.is_capture || bytes.is_empty() || self.shared.disabled.load(Ordering::Acquire) {
            return Ok(0);
        }

        let written = stream.ring.write(bytes);
        let stats = &self.shared.stats;
        StatsCounters::add(&stats.bytes_accepted, written);
        if written < bytes.len() {
            StatsCounters::add(&stats.bytes_dropped, bytes.len() - written);
            StatsCounters::add(&stats.overrun_events, 1);
        }

        if let Some(scheduler) = self.scheduler.as_ref() {
            scheduler.request_flush(false);
        }
        Ok(written)
    }

    /// Capture entry point. Serves buffered bytes and schedules a refill.
    /// Playback engines return 0.
    pub fn read_data(&self, out: &mut [u8]) -> Result<usize, SaveError> {
        let stream = self.stream()?;
        if !stream.is_capture {
            return Ok(0);
        }
        let read = stream.ring.read(out);
        if let Some(scheduler) = self.scheduler.as_ref() {
            scheduler.request_flush(false);
        }
        Ok(read)
    }

    /// Run one flush on the calling thread. Serialized with the worker.
    pub fn send_data(&self, force: bool) -> Result<FlushReport, SaveError> {
        let stream = self.stream()?;
        let report = stream.send_data(force);
        self.shared.report_overruns();
        Ok(report)
    }

    /// Ask the worker for a flush (playback) or refill (capture).
    pub fn request_flush(&self, force: bool) -> bool {
        self.scheduler.as_ref().is_some_and(|s| s.request_flush(force))
    }

    /// Force a flush and wait, bounded by the configured drain timeout,
    /// until the worker is idle.
    pub fn drain(&self) -> Result<(), SaveError> {
        self.stream()?;
        let scheduler = self.scheduler.as_ref().ok_or(SaveError::NotInitialized)?;
        scheduler.request_flush(true);

        let timeout = self.config.drain_timeout();
        if scheduler.wait_idle(timeout) {
            Ok(())
        } else {
            log::warn!("Drain of stream {} timed out after {:?}", self.config.stream_id, timeout);
            Err(SaveError::DrainTimeout(timeout))
        }
    }

    /// Same as [`drain`](Self::drain).
    pub fn wait_all_work_items(&self) -> Result<(), SaveError> {
        self.drain()
    }

    /// Gate all writes. Forwarded to every backend as well.
    pub fn disable(&self, disabled: bool) {
        self.shared.disabled.store(disabled, Ordering::Release);
        let mut backends = self.shared.backends.lock();
        for entry in backends.iter_mut() {
            if let Err(e) = entry.sink.disable(disabled) {
                log::warn!("Backend {} ignored disable({}): {}", entry.sink.name(), disabled, e);
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.shared.disabled.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, channel: u32, volume: i32) {
        let mut backends = self.shared.backends.lock();
        for entry in backends.iter_mut() {
            if let Err(e) = entry.sink.set_volume(channel, volume) {
                log::warn!("Backend {} failed to set volume: {}", entry.sink.name(), e);
            }
        }
    }

    /// Volume reported by the first backend.
    pub fn get_volume(&self, channel: u32) -> Option<i32> {
        let mut backends = self.shared.backends.lock();
        backends.first_mut().map(|entry| entry.sink.get_volume(channel))
    }

    pub fn set_mute(&self, mute: bool) {
        let mut backends = self.shared.backends.lock();
        for entry in backends.iter_mut() {
            if let Err(e) = entry.sink.set_mute(mute) {
                log::warn!("Backend {} failed to set mute: {}", entry.sink.name(), e);
            }
        }
    }

    /// Mute state reported by the first backend.
    pub fn get_mute(&self) -> Option<bool> {
        let mut backends = self.shared.backends.lock();
        backends.first_mut().map(|entry| entry.sink.get_mute())
    }

    /// Drain, stop the worker and finalize every backend.
    ///
    /// Backend failures during finalization are logged; the summaries of the
    /// backends that succeeded are still returned.
    pub fn close(&mut self) -> Result<Vec<RecordingSummary>, SaveError> {
        if self.stream.is_none() {
            return Ok(Vec::new());
        }
        if let Err(e) = self.drain() {
            log::warn!("Closing stream {} with pending data: {}", self.config.stream_id, e);
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        if let Some(stream) = self.stream.take() {
            if !stream.is_capture {
                stream.send_data(true);
            }
            self.shared.report_overruns();
        }

        let mut summaries = Vec::new();
        {
            let mut backends = self.shared.backends.lock();
            for entry in backends.iter_mut() {
                if !entry.active {
                    entry.sink.close();
                    continue;
                }
                entry.active = false;
                match entry.sink.finalize() {
                    Ok(Some(summary)) => summaries.push(summary),
                    Ok(None) => {}
                    Err(e) => log::error!("Failed to finalize backend {}: {}", entry.sink.name(), e),
                }
            }
        }

        *self.shared.state.lock() = StreamState::Stopped;
        log::info!("Stream {} closed", self.config.stream_id);
        Ok(summaries)
    }
}

impl Drop for SaveEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close stream {}: {}", self.config.stream_id, e);
        }
    }
}
