//! Send and receive workers
//!
//! Each worker is a dedicated, named OS thread running a blocking loop
//! against one half of the claimed device. Workers move through
//! `Created -> Running -> StopRequested -> Stopped` and never leave
//! `Stopped`; a new session spawns new workers.
//!
//! Failures inside a loop are never returned to a caller. They are recorded
//! on the worker's shared [`WorkerStatus`], which the controller exposes
//! through its health snapshot and shutdown report.

mod receive;
mod send;

pub(crate) use receive::ReceiveWorker;
pub(crate) use send::SendWorker;

use async_channel::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Created,
    Running,
    StopRequested,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Created => write!(f, "Created"),
            WorkerState::Running => write!(f, "Running"),
            WorkerState::StopRequested => write!(f, "StopRequested"),
            WorkerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A failure observed inside a worker loop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("USB transfer failed: {0}")]
    Transfer(rusb::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] crate::frame::CodecError),

    #[error("Inbound sink closed")]
    InboundClosed,

    #[error("Worker panicked: {0}")]
    Panicked(String),
}

/// Point-in-time view of a worker
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkerSnapshot {
    pub state: WorkerState,
    /// Most recent failure, transient or fatal
    pub last_error: Option<WorkerError>,
    /// Set when the loop ended because of a failure
    pub fatal: bool,
    /// Frames written (send) or forwarded (receive)
    pub frames: u64,
    pub errors: u64,
    /// Failures since the last success
    pub consecutive_errors: u64,
    /// Frames discarded: abandoned at stop (send) or refused by a full sink (receive)
    pub dropped: u64,
}

/// Shared, observable status of one worker
#[derive(Debug, Default)]
pub struct WorkerStatus {
    inner: Mutex<WorkerSnapshot>,
    changed: Condvar,
}

impl WorkerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WorkerSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        self.lock().clone()
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    fn set_state(&self, state: WorkerState) {
        let mut inner = self.lock();
        // Stopped is terminal; a late stop request must not resurrect a worker
        if inner.state == WorkerState::Stopped {
            return;
        }
        if state == WorkerState::Running && inner.state == WorkerState::StopRequested {
            return;
        }
        inner.state = state;
        drop(inner);
        self.changed.notify_all();
    }

    pub(crate) fn mark_running(&self) {
        self.set_state(WorkerState::Running);
    }

    pub(crate) fn mark_stop_requested(&self) {
        self.set_state(WorkerState::StopRequested);
    }

    pub(crate) fn mark_stopped(&self) {
        self.set_state(WorkerState::Stopped);
    }

    pub(crate) fn record_frame(&self) {
        let mut inner = self.lock();
        inner.frames += 1;
        inner.consecutive_errors = 0;
    }

    pub(crate) fn record_error(&self, error: WorkerError) {
        let mut inner = self.lock();
        inner.errors += 1;
        inner.consecutive_errors += 1;
        inner.last_error = Some(error);
    }

    /// Record the failure that ends the loop
    pub(crate) fn record_fatal(&self, error: WorkerError) {
        let mut inner = self.lock();
        inner.errors += 1;
        inner.consecutive_errors += 1;
        inner.fatal = true;
        inner.last_error = Some(error);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.lock().dropped += count;
    }

    /// Block until `done` holds for the state or `timeout` elapses
    ///
    /// Returns whether the condition was met.
    pub fn wait_for<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(WorkerState) -> bool,
    {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |inner| !done(inner.state))
            .unwrap_or_else(PoisonError::into_inner);
        done(guard.state)
    }
}

/// Cooperative stop request backed by a closed channel
///
/// Clones observe the same request. Requesting twice is harmless.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self { tx, rx }
    }

    pub fn request(&self) {
        self.tx.close();
    }

    pub fn is_requested(&self) -> bool {
        self.rx.is_closed()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A loop that can run on a worker thread
pub(crate) trait WorkerLoop: Send + 'static {
    /// Runs until the stop signal is observed or a fatal failure occurs
    fn run(self, stop: &StopSignal, status: &WorkerStatus);
}

/// Controller-side handle to a running worker
pub(crate) struct WorkerHandle {
    name: &'static str,
    status: Arc<WorkerStatus>,
    stop: StopSignal,
    thread: Option<JoinHandle<()>>,
}

/// How one worker ended during shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub name: &'static str,
    /// Whether the worker terminated within the join timeout
    pub joined: bool,
    pub snapshot: WorkerSnapshot,
}

impl WorkerHandle {
    /// Spawn `worker` on a new named thread
    pub(crate) fn spawn<W: WorkerLoop>(name: &'static str, worker: W) -> std::io::Result<Self> {
        let status = Arc::new(WorkerStatus::new());
        let stop = StopSignal::new();

        let thread = {
            let status = Arc::clone(&status);
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run_worker(name, worker, &stop, &status))?
        };

        Ok(Self {
            name,
            status,
            stop,
            thread: Some(thread),
        })
    }

    pub(crate) fn status(&self) -> &WorkerStatus {
        &self.status
    }

    pub(crate) fn request_stop(&self) {
        self.status.mark_stop_requested();
        self.stop.request();
    }

    /// Wait up to `timeout` for the worker to leave `Created`
    pub(crate) fn wait_started(&self, timeout: Duration) -> bool {
        self.status
            .wait_for(timeout, |state| state != WorkerState::Created)
    }

    /// Wait up to `timeout` for the worker to stop, then reap its thread
    ///
    /// A worker that misses the deadline is detached and left to finish on
    /// its own.
    pub(crate) fn join(mut self, timeout: Duration) -> WorkerReport {
        let started = Instant::now();
        let joined = self
            .status
            .wait_for(timeout, |state| state == WorkerState::Stopped);

        if joined {
            if let Some(thread) = self.thread.take() {
                // The status flips to Stopped as the last step of the thread
                if thread.join().is_err() {
                    warn!("{} thread exited with a panic", self.name);
                }
            }
            debug!("{} stopped after {:?}", self.name, started.elapsed());
        } else {
            warn!(
                "{} did not stop within {:?}, detaching it",
                self.name, timeout
            );
            self.thread.take();
        }

        WorkerReport {
            name: self.name,
            joined,
            snapshot: self.status.snapshot(),
        }
    }
}

fn run_worker<W: WorkerLoop>(name: &str, worker: W, stop: &StopSignal, status: &WorkerStatus) {
    status.mark_running();
    info!("{} started", name);

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        worker.run(stop, status)
    }));

    if let Err(panic) = outcome {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Panic in {}: {}", name, message);
        status.record_fatal(WorkerError::Panicked(message));
    }

    info!("{} stopped", name);
    status.mark_stopped();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UntilStopped;

    impl WorkerLoop for UntilStopped {
        fn run(self, stop: &StopSignal, _status: &WorkerStatus) {
            while !stop.is_requested() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    struct Panics;

    impl WorkerLoop for Panics {
        fn run(self, _stop: &StopSignal, _status: &WorkerStatus) {
            panic!("boom");
        }
    }

    struct IgnoresStop;

    impl WorkerLoop for IgnoresStop {
        fn run(self, _stop: &StopSignal, _status: &WorkerStatus) {
            std::thread::sleep(Duration::from_millis(500));
        }
    }

    #[test]
    fn test_stop_signal_is_shared_by_clones() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_requested());

        signal.request();
        signal.request();
        assert!(observer.is_requested());
    }

    #[test]
    fn test_worker_lifecycle() {
        let handle = WorkerHandle::spawn("test-worker", UntilStopped).unwrap();
        assert!(handle.wait_started(Duration::from_secs(1)));
        assert_eq!(handle.status().state(), WorkerState::Running);

        handle.request_stop();
        let report = handle.join(Duration::from_secs(1));

        assert!(report.joined);
        assert_eq!(report.snapshot.state, WorkerState::Stopped);
        assert!(!report.snapshot.fatal);
    }

    #[test]
    fn test_panic_is_recorded_and_worker_stops() {
        let handle = WorkerHandle::spawn("test-panics", Panics).unwrap();
        let report = handle.join(Duration::from_secs(1));

        assert!(report.joined);
        assert!(report.snapshot.fatal);
        assert_eq!(
            report.snapshot.last_error,
            Some(WorkerError::Panicked("boom".to_string()))
        );
    }

    #[test]
    fn test_join_times_out_on_stuck_worker() {
        let handle = WorkerHandle::spawn("test-stuck", IgnoresStop).unwrap();
        handle.request_stop();

        let started = Instant::now();
        let report = handle.join(Duration::from_millis(50));

        assert!(!report.joined);
        assert_eq!(report.snapshot.state, WorkerState::StopRequested);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_stopped_is_terminal() {
        let status = WorkerStatus::new();
        status.mark_running();
        status.mark_stopped();
        status.mark_stop_requested();
        status.mark_running();
        assert_eq!(status.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_success_resets_consecutive_errors() {
        let status = WorkerStatus::new();
        status.record_error(WorkerError::Transfer(rusb::Error::Pipe));
        status.record_error(WorkerError::Transfer(rusb::Error::Pipe));
        assert_eq!(status.snapshot().consecutive_errors, 2);

        status.record_frame();
        let snapshot = status.snapshot();
        assert_eq!(snapshot.consecutive_errors, 0);
        assert_eq!(snapshot.errors, 2);
        assert_eq!(snapshot.frames, 1);
    }
}
