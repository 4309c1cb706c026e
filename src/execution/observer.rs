use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, info};

/// Execution events emitted by the engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted { files: usize },
    ThrottleWaited { duration: Duration },
    FileStarted { reference: String },
    FileFinished { reference: String, succeeded: bool, bytes_read: u64 },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Forwards execution events to `tracing` under the `ingest::execution` target.
#[derive(Debug, Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted { files } => info!(target: "ingest::execution", files, "run started"),
            ExecutionEvent::ThrottleWaited { duration } => {
                debug!(target: "ingest::execution", waited = ?duration, "throttled")
            }
            ExecutionEvent::FileStarted { reference } => {
                debug!(target: "ingest::execution", reference = %reference, "file started")
            }
            ExecutionEvent::FileFinished { reference, succeeded, bytes_read } => debug!(
                target: "ingest::execution",
                reference = %reference,
                succeeded,
                bytes_read,
                "file finished"
            ),
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                info!(target: "ingest::execution", elapsed = ?elapsed, %metrics, "run finished")
            }
        }
    }
}

/// Real-time metrics for an execution run.
///
/// The engine updates these counters during execution; callers can snapshot them at any time.
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    files_started: AtomicU64,
    files_succeeded: AtomicU64,
    files_failed: AtomicU64,
    bytes_read: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_files: AtomicUsize,
    max_active_files: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            files_started: AtomicU64::new(0),
            files_succeeded: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            throttle_wait_ns: AtomicU64::new(0),
            active_files: AtomicUsize::new(0),
            max_active_files: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);

        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.files_started.store(0, Ordering::SeqCst);
        self.files_succeeded.store(0, Ordering::SeqCst);
        self.files_failed.store(0, Ordering::SeqCst);
        self.bytes_read.store(0, Ordering::SeqCst);
        self.throttle_wait_ns.store(0, Ordering::SeqCst);
        self.active_files.store(0, Ordering::SeqCst);
        self.max_active_files.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns.store(saturating_nanos(elapsed), Ordering::SeqCst);
    }

    pub fn on_file_start(&self) {
        let _ = self.files_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_files.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_files, now);
    }

    pub fn on_file_succeeded(&self, bytes_read: u64) {
        let _ = self.files_succeeded.fetch_add(1, Ordering::SeqCst);
        let _ = self.bytes_read.fetch_add(bytes_read, Ordering::SeqCst);
        let _ = self.active_files.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_file_failed(&self) {
        let _ = self.files_failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.active_files.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        let _ = self.throttle_wait_ns.fetch_add(saturating_nanos(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            files_started: self.files_started.load(Ordering::SeqCst),
            files_succeeded: self.files_succeeded.load(Ordering::SeqCst),
            files_failed: self.files_failed.load(Ordering::SeqCst),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_files: self.max_active_files.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    let _ = dst.fetch_max(now, Ordering::SeqCst);
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub files_started: u64,
    pub files_succeeded: u64,
    pub files_failed: u64,
    pub bytes_read: u64,
    pub throttle_wait: Duration,
    pub max_active_files: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, files={}/{} ok, failed={}, bytes_read={}, max_active_files={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.files_succeeded,
            self.files_started,
            self.files_failed,
            self.bytes_read,
            self.max_active_files,
            self.throttle_wait,
            self.elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ExecutionMetrics;

    #[test]
    fn begin_run_resets_counters_and_bumps_run_id() {
        let m = ExecutionMetrics::new();
        m.begin_run();
        m.on_file_start();
        m.on_file_start();
        m.on_file_succeeded(10);
        m.on_file_failed();
        m.on_throttle_wait(Duration::from_millis(3));
        m.end_run(Duration::from_millis(7));

        let s = m.snapshot();
        assert_eq!((s.run_id, s.files_started, s.files_succeeded, s.files_failed), (1, 2, 1, 1));
        assert_eq!((s.bytes_read, s.max_active_files), (10, 2));
        assert_eq!(s.throttle_wait, Duration::from_millis(3));
        assert_eq!(s.elapsed, Some(Duration::from_millis(7)));
        assert!(s.to_string().contains("files=1/2 ok"));

        m.begin_run();
        let s = m.snapshot();
        assert_eq!((s.run_id, s.files_started, s.bytes_read, s.elapsed), (2, 0, 0, None));
    }
}
