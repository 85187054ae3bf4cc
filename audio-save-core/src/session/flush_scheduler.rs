use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::error::SaveError;

/// Work executed by the scheduler. The argument is the `force` flag.
pub type FlushJob = Box<dyn FnMut(bool) + Send + 'static>;

struct Slot {
    /// A run is requested or in progress.
    busy: AtomicBool,
    /// A request arrived that the current run may not have observed.
    pending: AtomicBool,
    force: AtomicBool,
    shutdown: AtomicBool,
    runs: AtomicU64,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

/// Single-slot asynchronous flush trigger.
///
/// One dedicated worker thread sleeps until [`request_flush`] claims the
/// slot. While a run is in progress further requests only leave a note,
/// and all notes left during one run collapse into exactly one follow-up
/// run:
///
/// ```text
/// request ─┬─ slot free ─→ claim, unpark worker ─→ run ─┐
///          └─ slot busy ─→ set pending (+force) ────────┤
///                                                        ↓
///                          pending? ─ yes → run again ─ no → release slot
/// ```
///
/// Requesting costs a few atomic operations and at most one unpark, so it
/// is safe on the producer path. The job itself may block; a backend that
/// never returns keeps the slot busy and later requests only accumulate.
///
/// [`request_flush`]: FlushScheduler::request_flush
pub struct FlushScheduler {
    slot: Arc<Slot>,
    worker: Thread,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Spawn the worker thread that will run `job`.
    pub fn start(name: &str, mut job: FlushJob) -> Result<Self, SaveError> {
        let slot = Arc::new(Slot {
            busy: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            force: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
        });

        let worker_slot = Arc::clone(&slot);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_loop(&worker_slot, &mut job))
            .map_err(|e| SaveError::ConfigurationFailed(format!("failed to spawn flush worker: {}", e)))?;

        Ok(Self {
            slot,
            worker: handle.thread().clone(),
            handle: Some(handle),
        })
    }

    /// Ask for a run. Returns `true` if this call claimed the slot, `false`
    /// if the request was folded into a run already in flight.
    ///
    /// A forced request is never lost: its flag survives until a run picks
    /// it up.
    pub fn request_flush(&self, force: bool) -> bool {
        if force {
            self.slot.force.store(true, Ordering::Release);
        }
        self.slot.pending.store(true, Ordering::Release);

        if self
            .slot
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.worker.unpark();
            true
        } else {
            false
        }
    }

    /// Whether a run is requested or executing.
    pub fn is_busy(&self) -> bool {
        self.slot.busy.load(Ordering::Acquire)
    }

    /// Number of completed runs.
    pub fn runs(&self) -> u64 {
        self.slot.runs.load(Ordering::Acquire)
    }

    /// Block until the slot is free or `timeout` elapses. Returns `true` if
    /// the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.slot.idle_lock.lock();
        while self.slot.busy.load(Ordering::Acquire) {
            if self.slot.idle.wait_until(&mut guard, deadline).timed_out() {
                return !self.slot.busy.load(Ordering::Acquire);
            }
        }
        true
    }

    /// Stop the worker after its current run and join it.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.slot.shutdown.store(true, Ordering::Release);
        self.worker.unpark();
        if handle.join().is_err() {
            log::error!("flush worker panicked");
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(slot: &Slot, job: &mut FlushJob) {
    loop {
        while !slot.busy.load(Ordering::Acquire) {
            if slot.shutdown.load(Ordering::Acquire) {
                return;
            }
            thread::park();
        }

        loop {
            slot.pending.store(false, Ordering::Release);
            let force = slot.force.swap(false, Ordering::AcqRel);
            job(force);
            slot.runs.fetch_add(1, Ordering::AcqRel);
            if !slot.pending.load(Ordering::Acquire) {
                break;
            }
        }

        slot.busy.store(false, Ordering::Release);
        // A request may have set `pending` after the check above but before
        // the slot was released; its claim failed, so re-claim for it here.
        if slot.pending.load(Ordering::Acquire)
            && slot
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            continue;
        }

        let _guard = slot.idle_lock.lock();
        slot.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn request_runs_job_once() {
        let (tx, rx) = mpsc::channel();
        let scheduler = FlushScheduler::start(
            "test-flush",
            Box::new(move |force| {
                tx.send(force).unwrap();
            }),
        )
        .unwrap();

        assert!(scheduler.request_flush(true));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(scheduler.runs(), 1);
    }

    #[test]
    fn requests_during_a_run_coalesce() {
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let forced = Arc::new(Mutex::new(Vec::new()));

        let job_forced = Arc::clone(&forced);
        let mut first = true;
        let scheduler = FlushScheduler::start(
            "test-flush",
            Box::new(move |force| {
                job_forced.lock().push(force);
                if first {
                    first = false;
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                }
            }),
        )
        .unwrap();

        assert!(scheduler.request_flush(false));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..10 {
            assert!(!scheduler.request_flush(false));
        }
        assert!(!scheduler.request_flush(true));
        release_tx.send(()).unwrap();

        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(scheduler.runs(), 2);
        assert_eq!(*forced.lock(), vec![false, true]);
    }

    #[test]
    fn wait_idle_times_out_on_stuck_job() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let scheduler = FlushScheduler::start(
            "test-flush",
            Box::new(move |_| {
                let _ = release_rx.recv();
            }),
        )
        .unwrap();

        scheduler.request_flush(false);
        assert!(!scheduler.wait_idle(Duration::from_millis(50)));
        assert!(scheduler.is_busy());

        release_tx.send(()).unwrap();
        assert!(scheduler.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn idle_scheduler_waits_immediately() {
        let scheduler = FlushScheduler::start("test-flush", Box::new(|_| {})).unwrap();
        assert!(scheduler.wait_idle(Duration::from_millis(1)));
        assert_eq!(scheduler.runs(), 0);
    }

    #[test]
    fn shutdown_joins_worker() {
        let mut scheduler = FlushScheduler::start("test-flush", Box::new(|_| {})).unwrap();
        scheduler.request_flush(false);
        scheduler.shutdown();
        scheduler.shutdown();
    }
}
