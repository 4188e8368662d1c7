#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional event counters for the scheduler.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Jobs allocated through `create_job`.
    pub jobs_created: AtomicU64,
    /// Jobs accepted by `submit_job`.
    pub jobs_submitted: AtomicU64,
    /// Jobs that reached true completion in the `Completed` state.
    pub jobs_completed: AtomicU64,
    /// Jobs that reached true completion in the `Canceled` state.
    pub jobs_canceled: AtomicU64,
    /// Pushes onto ready queues (submission and waiter release).
    pub ready_pushes: AtomicU64,
    /// Takes from ready queues.
    pub ready_takes: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_created: AtomicU64::new(0),
            jobs_submitted: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_canceled: AtomicU64::new(0),
            ready_pushes: AtomicU64::new(0),
            ready_takes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn jobs_created(&self) {
        self.jobs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn jobs_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn jobs_canceled(&self) {
        self.jobs_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ready_pushes(&self) {
        self.ready_pushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ready_takes(&self) {
        self.ready_takes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_canceled: self.jobs_canceled.load(Ordering::Relaxed),
            ready_pushes: self.ready_pushes.load(Ordering::Relaxed),
            ready_takes: self.ready_takes.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

/// Snapshot of scheduler counters at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub jobs_created: u64,
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_canceled: u64,
    pub ready_pushes: u64,
    pub ready_takes: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Completed jobs per second since collection started.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Jobs created but not yet finished (completed or canceled).
    pub fn jobs_in_flight(&self) -> i64 {
        self.jobs_created as i64 - self.jobs_completed as i64 - self.jobs_canceled as i64
    }

    /// Approximate total ready-queue depth (pushes - takes).
    pub fn ready_depth(&self) -> i64 {
        self.ready_pushes as i64 - self.ready_takes as i64
    }
}
