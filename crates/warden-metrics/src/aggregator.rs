//! Metrics aggregation: per-worker reports into a cluster snapshot.

use std::collections::BTreeMap;

use tokio::time::Instant;
use tracing::debug;

use warden_core::{ClusterSnapshot, WorkerHandle, epoch_millis};

/// Aggregate eligible workers into a snapshot.
///
/// Only `Ready` and `Degraded` workers count. The request rate is the
/// summed counter growth of workers present in both `previous` and now,
/// scaled to a minute over the real elapsed time. Workers that left do not
/// pull the rate down; a newly eligible worker counts from its first sample.
pub fn aggregate(workers: &[WorkerHandle], previous: Option<&ClusterSnapshot>, now: Instant) -> ClusterSnapshot {
    let eligible: Vec<&WorkerHandle> = workers.iter().filter(|w| w.status.is_eligible()).collect();
    if eligible.is_empty() {
        return ClusterSnapshot::empty(now);
    }

    let count = eligible.len() as f64;
    let avg_cpu = eligible.iter().map(|w| w.last_metrics.cpu_percent).sum::<f64>() / count;
    let avg_memory = eligible.iter().map(|w| w.last_metrics.memory_percent).sum::<f64>() / count;
    let total_requests: u64 = eligible.iter().map(|w| w.last_metrics.requests_served).sum();
    let total_errors: u64 = eligible.iter().map(|w| w.last_metrics.errors_observed).sum();
    let worker_requests: BTreeMap<_, _> = eligible
        .iter()
        .map(|w| (w.id, w.last_metrics.requests_served))
        .collect();

    let request_rate_per_minute = match previous {
        Some(prev) => {
            let elapsed = now.saturating_duration_since(prev.taken_at).as_secs_f64();
            if elapsed > 0.0 {
                let served: u64 = worker_requests
                    .iter()
                    .filter_map(|(id, now_count)| {
                        prev.worker_requests.get(id).map(|before| now_count.saturating_sub(*before))
                    })
                    .sum();
                served as f64 * 60.0 / elapsed
            } else {
                prev.request_rate_per_minute
            }
        }
        None => 0.0,
    };

    let error_rate_percent = if total_requests > 0 {
        total_errors as f64 / total_requests as f64 * 100.0
    } else {
        0.0
    };

    ClusterSnapshot {
        worker_count: eligible.len() as u32,
        avg_cpu,
        avg_memory,
        total_requests,
        total_errors,
        request_rate_per_minute,
        error_rate_percent,
        taken_at: now,
        timestamp_ms: epoch_millis(),
        worker_requests,
    }
}

/// Keeps the previous snapshot so each tick can compute rates.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    previous: Option<ClusterSnapshot>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a new snapshot and remember it.
    pub fn observe(&mut self, workers: &[WorkerHandle], now: Instant) -> ClusterSnapshot {
        let snapshot = aggregate(workers, self.previous.as_ref(), now);
        debug!(
            workers = snapshot.worker_count,
            avg_cpu = snapshot.avg_cpu,
            avg_memory = snapshot.avg_memory,
            rpm = snapshot.request_rate_per_minute,
            "cluster snapshot"
        );
        self.previous = Some(snapshot.clone());
        snapshot
    }

    pub fn latest(&self) -> Option<&ClusterSnapshot> {
        self.previous.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_core::{MetricsReport, WorkerId, WorkerStatus};

    fn worker(id: u64, status: WorkerStatus, cpu: f64, mem: f64, requests: u64, errors: u64) -> WorkerHandle {
        let now = Instant::now();
        let mut w = WorkerHandle::starting(WorkerId(id), None, now);
        w.status = status;
        w.last_metrics.apply(
            &MetricsReport {
                cpu_percent: cpu,
                memory_percent: mem,
                requests_served: requests,
                errors_observed: errors,
                ready: true,
            },
            now,
        );
        w
    }

    #[tokio::test]
    async fn empty_pool_gives_zeroes() {
        let snap = aggregate(&[], None, Instant::now());
        assert_eq!(snap.worker_count, 0);
        assert_eq!(snap.avg_cpu, 0.0);
        assert_eq!(snap.request_rate_per_minute, 0.0);
    }

    #[tokio::test]
    async fn averages_only_eligible_workers() {
        let workers = vec![
            worker(1, WorkerStatus::Ready, 80.0, 40.0, 100, 0),
            worker(2, WorkerStatus::Degraded, 90.0, 60.0, 100, 0),
            worker(3, WorkerStatus::Starting, 0.0, 0.0, 0, 0),
            worker(4, WorkerStatus::Terminating, 5.0, 5.0, 1000, 0),
            worker(5, WorkerStatus::Dead, 99.0, 99.0, 1000, 0),
        ];
        let snap = aggregate(&workers, None, Instant::now());

        assert_eq!(snap.worker_count, 2);
        assert_eq!(snap.avg_cpu, 85.0);
        assert_eq!(snap.avg_memory, 50.0);
        assert_eq!(snap.total_requests, 200);
    }

    #[tokio::test]
    async fn only_ineligible_workers_is_empty() {
        let workers = vec![worker(1, WorkerStatus::Starting, 50.0, 50.0, 10, 0)];
        let snap = aggregate(&workers, None, Instant::now());
        assert_eq!(snap.worker_count, 0);
        assert_eq!(snap.avg_cpu, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_rate_normalized_to_elapsed_time() {
        let first = aggregate(&[worker(1, WorkerStatus::Ready, 10.0, 10.0, 1000, 0)], None, Instant::now());
        assert_eq!(first.request_rate_per_minute, 0.0);

        tokio::time::advance(Duration::from_secs(30)).await;
        let second = aggregate(
            &[worker(1, WorkerStatus::Ready, 10.0, 10.0, 1600, 0)],
            Some(&first),
            Instant::now(),
        );
        // 600 requests in 30s.
        assert_eq!(second.request_rate_per_minute, 1200.0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_rate_counts_survivors_after_worker_loss() {
        let first = aggregate(
            &[
                worker(1, WorkerStatus::Ready, 10.0, 10.0, 100_000, 0),
                worker(2, WorkerStatus::Ready, 10.0, 10.0, 3000, 0),
                worker(3, WorkerStatus::Ready, 10.0, 10.0, 3000, 0),
            ],
            None,
            Instant::now(),
        );

        tokio::time::advance(Duration::from_secs(30)).await;
        let second = aggregate(
            &[
                worker(2, WorkerStatus::Ready, 10.0, 10.0, 6000, 0),
                worker(3, WorkerStatus::Ready, 10.0, 10.0, 6000, 0),
            ],
            Some(&first),
            Instant::now(),
        );
        // 6000 requests in 30s from the two survivors.
        assert_eq!(second.request_rate_per_minute, 12_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn newly_eligible_worker_counts_from_first_sample() {
        let first = aggregate(&[worker(1, WorkerStatus::Ready, 10.0, 10.0, 1000, 0)], None, Instant::now());

        tokio::time::advance(Duration::from_secs(60)).await;
        let workers = vec![
            worker(1, WorkerStatus::Ready, 10.0, 10.0, 1500, 0),
            worker(2, WorkerStatus::Ready, 10.0, 10.0, 80_000, 0),
        ];
        let second = aggregate(&workers, Some(&first), Instant::now());
        // The newcomer's lifetime counter is only a baseline.
        assert_eq!(second.request_rate_per_minute, 500.0);

        tokio::time::advance(Duration::from_secs(60)).await;
        let workers = vec![
            worker(1, WorkerStatus::Ready, 10.0, 10.0, 2000, 0),
            worker(2, WorkerStatus::Ready, 10.0, 10.0, 80_300, 0),
        ];
        let third = aggregate(&workers, Some(&second), Instant::now());
        assert_eq!(third.request_rate_per_minute, 800.0);
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_counter_does_not_go_negative() {
        let first = aggregate(&[worker(1, WorkerStatus::Ready, 10.0, 10.0, 900, 0)], None, Instant::now());
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = aggregate(&[worker(1, WorkerStatus::Ready, 10.0, 10.0, 100, 0)], Some(&first), Instant::now());
        assert_eq!(second.request_rate_per_minute, 0.0);
    }

    #[tokio::test]
    async fn error_rate_is_percentage() {
        let workers = vec![
            worker(1, WorkerStatus::Ready, 10.0, 10.0, 150, 3),
            worker(2, WorkerStatus::Ready, 10.0, 10.0, 50, 1),
        ];
        let snap = aggregate(&workers, None, Instant::now());
        assert_eq!(snap.total_errors, 4);
        assert!((snap.error_rate_percent - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn aggregator_remembers_previous() {
        let mut agg = MetricsAggregator::new();
        assert!(agg.latest().is_none());

        agg.observe(&[worker(1, WorkerStatus::Ready, 10.0, 10.0, 0, 0)], Instant::now());
        tokio::time::advance(Duration::from_secs(60)).await;
        let snap = agg.observe(&[worker(1, WorkerStatus::Ready, 10.0, 10.0, 250, 0)], Instant::now());

        assert_eq!(snap.request_rate_per_minute, 250.0);
        assert_eq!(agg.latest(), Some(&snap));
    }
}
