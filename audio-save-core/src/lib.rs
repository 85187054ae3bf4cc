//! # audio-save-core
//!
//! Never-blocking persistence for a single PCM audio stream.
//!
//! The producer (typically a real-time audio callback) hands bytes to
//! [`SaveEngine::write_data`], which only copies them into a single-producer ring
//! and wakes a flush worker. The worker drains the ring in fixed-size
//! transfer chunks and fans every chunk out to the registered backends:
//! a WAV file, TCP clients, a companion virtual device. Backends implement
//! the `BackendSink` trait and can be mixed freely.
//!
//! ## Architecture
//!
//! ```text
//! audio-save-core (this crate)
//! ├── traits/       ← BackendSink, SaveDelegate, SettingsStore, DeviceHandle
//! ├── models/       ← SaveError, StreamState, AudioFormat, EngineConfig, EngineStats
//! ├── processing/   ← RingBuffer, WAV header generation
//! ├── session/      ← SaveEngine (orchestrator), FlushScheduler
//! ├── backends/     ← NetworkBackend, VirtualDeviceBackend, MemoryBackend
//! └── storage/      ← LocalFileBackend, metadata sidecar, settings stores
//! ```

pub mod backends;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backends::controls::SinkControls;
pub use backends::memory::{MemoryBackend, MemoryTap};
pub use backends::network::{NetworkBackend, NetworkMode};
pub use backends::virtual_device::VirtualDeviceBackend;
pub use models::audio_format::AudioFormat;
pub use models::config::{EngineConfig, DEFAULT_BUFFER_CAPACITY};
pub use models::error::SaveError;
pub use models::recording_result::{RecordingMetadata, RecordingSummary};
pub use models::state::StreamState;
pub use models::stats::EngineStats;
pub use processing::ring_buffer::RingBuffer;
pub use session::flush_scheduler::FlushScheduler;
pub use session::save_engine::{FlushReport, SaveEngine};
pub use storage::local_file::LocalFileBackend;
pub use storage::settings::{JsonFileSettings, MemorySettings};
pub use traits::backend_sink::BackendSink;
pub use traits::device_handle::{ControlCode, DeviceHandle, DeviceLocator};
pub use traits::save_delegate::SaveDelegate;
pub use traits::settings_store::SettingsStore;
