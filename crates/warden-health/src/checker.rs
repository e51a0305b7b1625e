//! Per-worker health check logic.
//!
//! Freshness of the last metrics report, and consecutive-check tracking of
//! resource exhaustion.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use warden_core::{WorkerHandle, WorkerStatus};

/// Result of checking when a worker last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Reported within the allowed window.
    Fresh,
    /// Silent for longer than the allowed window.
    Stale(Duration),
}

/// Check a worker's report age against `stale_after`.
///
/// Workers that have not reported yet are measured from their spawn time.
pub fn freshness(worker: &WorkerHandle, now: Instant, stale_after: Duration) -> Freshness {
    let since = now.saturating_duration_since(worker.last_metrics.last_report_at);
    if since > stale_after {
        Freshness::Stale(since)
    } else {
        Freshness::Fresh
    }
}

/// Tracks consecutive overloaded checks for a single worker.
#[derive(Debug)]
pub struct LoadTracker {
    /// Consecutive checks with CPU or memory above the bound.
    consecutive_overloaded: u32,
    /// Checks needed before the worker counts as degraded.
    threshold: u32,
    /// CPU/memory percentage bound.
    limit_percent: f64,
}

impl LoadTracker {
    pub fn new(limit_percent: f64, threshold: u32) -> Self {
        Self {
            consecutive_overloaded: 0,
            threshold,
            limit_percent,
        }
    }

    /// Record one check of `worker` and return whether the load has been
    /// over the bound for `threshold` consecutive checks.
    pub fn record(&mut self, worker: &WorkerHandle) -> bool {
        let m = &worker.last_metrics;
        let overloaded = m.cpu_percent > self.limit_percent || m.memory_percent > self.limit_percent;

        if overloaded {
            self.consecutive_overloaded += 1;
            debug!(
                worker = %worker.id,
                cpu = m.cpu_percent,
                memory = m.memory_percent,
                streak = self.consecutive_overloaded,
                "worker over load bound"
            );
        } else {
            self.consecutive_overloaded = 0;
        }

        self.is_sustained()
    }

    pub fn is_sustained(&self) -> bool {
        self.consecutive_overloaded >= self.threshold
    }

    pub fn consecutive_overloaded(&self) -> u32 {
        self.consecutive_overloaded
    }

    /// Whether a degraded worker may go back to `Ready`.
    pub fn recovered(&self, status: WorkerStatus) -> bool {
        status == WorkerStatus::Degraded && self.consecutive_overloaded == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::WorkerId;

    fn worker(cpu: f64, mem: f64, now: Instant) -> WorkerHandle {
        let mut w = WorkerHandle::starting(WorkerId(1), None, now);
        w.status = WorkerStatus::Ready;
        w.last_metrics.cpu_percent = cpu;
        w.last_metrics.memory_percent = mem;
        w
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_within_window() {
        let now = Instant::now();
        let w = worker(10.0, 10.0, now);
        tokio::time::advance(Duration::from_secs(19)).await;
        assert_eq!(freshness(&w, Instant::now(), Duration::from_secs(20)), Freshness::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_after_window() {
        let now = Instant::now();
        let w = worker(10.0, 10.0, now);
        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(matches!(
            freshness(&w, Instant::now(), Duration::from_secs(20)),
            Freshness::Stale(d) if d >= Duration::from_secs(21)
        ));
    }

    #[tokio::test]
    async fn single_spike_is_not_sustained() {
        let now = Instant::now();
        let mut tracker = LoadTracker::new(95.0, 2);
        assert!(!tracker.record(&worker(99.0, 10.0, now)));
        assert_eq!(tracker.consecutive_overloaded(), 1);
    }

    #[tokio::test]
    async fn two_consecutive_overloads_are_sustained() {
        let now = Instant::now();
        let mut tracker = LoadTracker::new(95.0, 2);
        tracker.record(&worker(10.0, 96.0, now));
        assert!(tracker.record(&worker(10.0, 97.0, now)));
    }

    #[tokio::test]
    async fn normal_check_resets_streak() {
        let now = Instant::now();
        let mut tracker = LoadTracker::new(95.0, 2);
        tracker.record(&worker(99.0, 10.0, now));
        tracker.record(&worker(50.0, 10.0, now));
        assert!(!tracker.record(&worker(99.0, 10.0, now)));
    }

    #[tokio::test]
    async fn exactly_at_bound_is_not_overloaded() {
        let now = Instant::now();
        let mut tracker = LoadTracker::new(95.0, 1);
        assert!(!tracker.record(&worker(95.0, 95.0, now)));
    }

    #[tokio::test]
    async fn recovery_requires_clear_check() {
        let now = Instant::now();
        let mut tracker = LoadTracker::new(95.0, 2);
        tracker.record(&worker(99.0, 10.0, now));
        assert!(!tracker.recovered(WorkerStatus::Degraded));
        tracker.record(&worker(20.0, 10.0, now));
        assert!(tracker.recovered(WorkerStatus::Degraded));
        assert!(!tracker.recovered(WorkerStatus::Ready));
    }
}
