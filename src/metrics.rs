#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional scheduler counters, compiled in with the `metrics` feature.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Jobs allocated from pools.
    pub jobs_allocated: AtomicU64,
    /// Jobs pushed to the injector.
    pub jobs_enqueued: AtomicU64,
    /// Job bodies executed (playback re-executions included).
    pub jobs_run: AtomicU64,
    /// Completions (job plus all descendants finished).
    pub jobs_finished: AtomicU64,
    /// Successful steals from peer queues.
    pub steals_success: AtomicU64,
    /// Steal attempts that found nothing or hit contention.
    pub steals_failed: AtomicU64,
    /// Playback runs started.
    pub playbacks_started: AtomicU64,
    /// Playback runs that fired their completion job.
    pub playbacks_finished: AtomicU64,
    /// Time when collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Metrics {
            jobs_allocated: AtomicU64::new(0),
            jobs_enqueued: AtomicU64::new(0),
            jobs_run: AtomicU64::new(0),
            jobs_finished: AtomicU64::new(0),
            steals_success: AtomicU64::new(0),
            steals_failed: AtomicU64::new(0),
            playbacks_started: AtomicU64::new(0),
            playbacks_finished: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_allocated: self.jobs_allocated.load(Ordering::Relaxed),
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_run: self.jobs_run.load(Ordering::Relaxed),
            jobs_finished: self.jobs_finished.load(Ordering::Relaxed),
            steals_success: self.steals_success.load(Ordering::Relaxed),
            steals_failed: self.steals_failed.load(Ordering::Relaxed),
            playbacks_started: self.playbacks_started.load(Ordering::Relaxed),
            playbacks_finished: self.playbacks_finished.load(Ordering::Relaxed),
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

/// Point-in-time copy of the counters.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_allocated: u64,
    pub jobs_enqueued: u64,
    pub jobs_run: u64,
    pub jobs_finished: u64,
    pub steals_success: u64,
    pub steals_failed: u64,
    pub playbacks_started: u64,
    pub playbacks_finished: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Completions per second since collection started.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_finished as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Enqueued but not yet finished, approximated from the counters.
    pub fn outstanding(&self) -> i64 {
        self.jobs_enqueued as i64 - self.jobs_finished as i64
    }
}
