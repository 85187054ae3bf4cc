use crate::models::error::SaveError;
use crate::models::state::StreamState;

/// Event sink for engine notifications.
///
/// Called from the control thread and from the flush worker, never from
/// `write_data`. Implementations should return quickly: while a callback
/// runs, the flush worker is not draining the ring.
pub trait SaveDelegate: Send + Sync {
    /// Called after every backend accepted a new stream state.
    fn on_state_changed(&self, state: StreamState);

    /// Called by the flush worker when it notices new dropped bytes.
    /// `dropped_total` is cumulative for the engine.
    fn on_overrun(&self, dropped_total: u64);

    /// Called when a backend fails during delivery.
    fn on_backend_error(&self, backend: &str, error: &SaveError);
}
