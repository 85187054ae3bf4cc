use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live engine counters. Updated with relaxed atomics from both the
/// producer and the consumer side.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub bytes_accepted: AtomicU64,
    pub bytes_dropped: AtomicU64,
    pub overrun_events: AtomicU64,
    pub bytes_delivered: AtomicU64,
    pub bytes_captured: AtomicU64,
    pub flush_runs: AtomicU64,
    pub backend_failures: AtomicU64,
    /// Drop count the consumer has already reported.
    pub reported_drops: AtomicU64,
}

impl StatsCounters {
    pub fn add(counter: &AtomicU64, value: usize) {
        counter.fetch_add(value as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            bytes_accepted: self.bytes_accepted.load(Ordering::Relaxed),
            bytes_dropped: self.bytes_dropped.load(Ordering::Relaxed),
            overrun_events: self.overrun_events.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            flush_runs: self.flush_runs.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters, for diagnostics export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Bytes the producer handed over that fit in the ring.
    pub bytes_accepted: u64,
    /// Bytes discarded because the ring was full.
    pub bytes_dropped: u64,
    /// Number of `write_data` calls that dropped anything.
    pub overrun_events: u64,
    /// Bytes consumed from the ring and fanned out to the backends.
    pub bytes_delivered: u64,
    /// Bytes pulled from backends into the ring in capture mode.
    pub bytes_captured: u64,
    pub flush_runs: u64,
    pub backend_failures: u64,
}
