//! Health monitor: turns pool snapshots into health actions.
//!
//! The `HealthMonitor` is driven by the controller's health ticker. It keeps
//! one `LoadTracker` per worker and forgets workers once they leave the pool.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use warden_core::{OrchestratorConfig, WorkerHandle, WorkerId, WorkerStatus};

use crate::checker::{Freshness, LoadTracker, freshness};

/// Consecutive overloaded checks before a worker is marked degraded.
const SUSTAINED_CHECKS: u32 = 2;

/// Something the controller should do to a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthAction {
    /// Stopped reporting: mark `Dead`, kill it, replace if below minimum.
    MarkDead { id: WorkerId, silent_for: Duration },
    /// Sustained resource exhaustion: mark `Degraded`, keep it running.
    MarkDegraded { id: WorkerId, cpu_percent: f64, memory_percent: f64 },
    /// A degraded worker is back under the load bound.
    Recovered { id: WorkerId },
}

impl HealthAction {
    pub fn worker(&self) -> WorkerId {
        match self {
            Self::MarkDead { id, .. } | Self::MarkDegraded { id, .. } | Self::Recovered { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthSettings {
    /// Health check period. Workers are stale after twice this.
    pub interval: Duration,
    /// Longest a worker may stay `Starting` without a first report.
    pub startup_timeout: Duration,
    /// CPU/memory bound for sustained-load detection.
    pub high_load_percent: f64,
}

impl HealthSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            interval: config.scaling.health_check_interval,
            startup_timeout: config.startup_timeout,
            high_load_percent: config.high_load_percent,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.interval * 2
    }
}

pub struct HealthMonitor {
    settings: HealthSettings,
    trackers: HashMap<WorkerId, LoadTracker>,
}

impl HealthMonitor {
    pub fn new(settings: HealthSettings) -> Self {
        Self {
            settings,
            trackers: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Run one health check over the pool.
    ///
    /// `Terminating` and `Dead` workers are skipped; they are already on
    /// their way out.
    pub fn check(&mut self, workers: &[WorkerHandle], now: Instant) -> Vec<HealthAction> {
        self.trackers.retain(|id, _| workers.iter().any(|w| w.id == *id));

        let mut actions = Vec::new();
        for worker in workers {
            match worker.status {
                WorkerStatus::Starting => {
                    if let Some(action) = self.check_startup(worker, now) {
                        actions.push(action);
                    }
                }
                WorkerStatus::Ready | WorkerStatus::Degraded => {
                    if let Some(action) = self.check_running(worker, now) {
                        actions.push(action);
                    }
                }
                WorkerStatus::Terminating | WorkerStatus::Dead => {}
            }
        }

        debug!(checked = workers.len(), actions = actions.len(), "health check complete");
        actions
    }

    fn check_startup(&mut self, worker: &WorkerHandle, now: Instant) -> Option<HealthAction> {
        let waited = now.saturating_duration_since(worker.started_at);
        if waited > self.settings.startup_timeout {
            warn!(
                worker = %worker.id,
                waited_ms = waited.as_millis() as u64,
                "worker never became ready, marking dead"
            );
            self.trackers.remove(&worker.id);
            return Some(HealthAction::MarkDead {
                id: worker.id,
                silent_for: waited,
            });
        }
        None
    }

    fn check_running(&mut self, worker: &WorkerHandle, now: Instant) -> Option<HealthAction> {
        if let Freshness::Stale(silent_for) = freshness(worker, now, self.settings.stale_after()) {
            warn!(
                worker = %worker.id,
                silent_ms = silent_for.as_millis() as u64,
                "worker stopped reporting, marking dead"
            );
            self.trackers.remove(&worker.id);
            return Some(HealthAction::MarkDead {
                id: worker.id,
                silent_for,
            });
        }

        let limit = self.settings.high_load_percent;
        let tracker = self
            .trackers
            .entry(worker.id)
            .or_insert_with(|| LoadTracker::new(limit, SUSTAINED_CHECKS));
        let sustained = tracker.record(worker);

        if sustained && worker.status == WorkerStatus::Ready {
            warn!(
                worker = %worker.id,
                cpu = worker.last_metrics.cpu_percent,
                memory = worker.last_metrics.memory_percent,
                "sustained resource exhaustion, marking degraded"
            );
            return Some(HealthAction::MarkDegraded {
                id: worker.id,
                cpu_percent: worker.last_metrics.cpu_percent,
                memory_percent: worker.last_metrics.memory_percent,
            });
        }

        if tracker.recovered(worker.status) {
            info!(worker = %worker.id, "worker load back under bound");
            return Some(HealthAction::Recovered { id: worker.id });
        }

        None
    }

    /// Workers with an active load streak.
    pub fn tracked(&self) -> usize {
        self.trackers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::MetricsReport;

    fn settings() -> HealthSettings {
        HealthSettings {
            interval: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(60),
            high_load_percent: 95.0,
        }
    }

    fn ready(id: u64, now: Instant) -> WorkerHandle {
        let mut w = WorkerHandle::starting(WorkerId(id), Some(100 + id as u32), now);
        w.status = WorkerStatus::Ready;
        w
    }

    fn report(w: &mut WorkerHandle, cpu: f64, mem: f64, now: Instant) {
        w.last_metrics.apply(
            &MetricsReport {
                cpu_percent: cpu,
                memory_percent: mem,
                requests_served: 0,
                errors_observed: 0,
                ready: true,
            },
            now,
        );
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_workers_produce_no_actions() {
        let mut monitor = HealthMonitor::new(settings());
        let now = Instant::now();
        let mut a = ready(1, now);
        let mut b = ready(2, now);
        report(&mut a, 40.0, 50.0, now);
        report(&mut b, 20.0, 30.0, now);

        assert!(monitor.check(&[a, b], now).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn frozen_worker_marked_dead_after_two_intervals() {
        let mut monitor = HealthMonitor::new(settings());
        let start = Instant::now();
        let mut w = ready(1, start);
        report(&mut w, 10.0, 10.0, start);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(monitor.check(std::slice::from_ref(&w), Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let actions = monitor.check(std::slice::from_ref(&w), Instant::now());
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions[0],
            HealthAction::MarkDead { id: WorkerId(1), silent_for } if silent_for == Duration::from_secs(21)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_worker_also_goes_stale() {
        let mut monitor = HealthMonitor::new(settings());
        let start = Instant::now();
        let mut w = ready(1, start);
        w.status = WorkerStatus::Degraded;

        tokio::time::advance(Duration::from_secs(25)).await;
        let actions = monitor.check(&[w], Instant::now());
        assert!(matches!(actions[..], [HealthAction::MarkDead { .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn starting_worker_bounded_by_startup_timeout() {
        let mut monitor = HealthMonitor::new(settings());
        let w = WorkerHandle::starting(WorkerId(1), None, Instant::now());

        // Far past the stale window, still inside the startup timeout.
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(monitor.check(std::slice::from_ref(&w), Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(16)).await;
        let actions = monitor.check(&[w], Instant::now());
        assert!(matches!(actions[..], [HealthAction::MarkDead { id: WorkerId(1), .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn terminating_and_dead_are_skipped() {
        let mut monitor = HealthMonitor::new(settings());
        let start = Instant::now();
        let mut a = ready(1, start);
        a.status = WorkerStatus::Terminating;
        let mut b = ready(2, start);
        b.status = WorkerStatus::Dead;

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(monitor.check(&[a, b], Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_overloaded_check_does_not_degrade() {
        let mut monitor = HealthMonitor::new(settings());
        let now = Instant::now();
        let mut w = ready(1, now);
        report(&mut w, 99.0, 40.0, now);

        assert!(monitor.check(&[w], now).is_empty());
        assert_eq!(monitor.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_overload_marks_degraded_once() {
        let mut monitor = HealthMonitor::new(settings());
        let now = Instant::now();
        let mut w = ready(1, now);
        report(&mut w, 40.0, 97.0, now);

        assert!(monitor.check(std::slice::from_ref(&w), now).is_empty());
        let actions = monitor.check(std::slice::from_ref(&w), now);
        assert!(matches!(
            actions[..],
            [HealthAction::MarkDegraded { id: WorkerId(1), memory_percent, .. }] if memory_percent == 97.0
        ));

        // Controller applied it; still overloaded means nothing new.
        w.status = WorkerStatus::Degraded;
        assert!(monitor.check(&[w], now).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_worker_recovers() {
        let mut monitor = HealthMonitor::new(settings());
        let now = Instant::now();
        let mut w = ready(1, now);
        report(&mut w, 99.0, 10.0, now);
        monitor.check(std::slice::from_ref(&w), now);
        monitor.check(std::slice::from_ref(&w), now);
        w.status = WorkerStatus::Degraded;

        report(&mut w, 50.0, 10.0, now);
        let actions = monitor.check(&[w], now);
        assert_eq!(actions, vec![HealthAction::Recovered { id: WorkerId(1) }]);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_workers_are_forgotten() {
        let mut monitor = HealthMonitor::new(settings());
        let now = Instant::now();
        let mut a = ready(1, now);
        let mut b = ready(2, now);
        report(&mut a, 99.0, 10.0, now);
        report(&mut b, 99.0, 10.0, now);
        monitor.check(&[a.clone(), b], now);
        assert_eq!(monitor.tracked(), 2);

        monitor.check(&[a], now);
        assert_eq!(monitor.tracked(), 1);
    }

    #[test]
    fn settings_from_config() {
        let config = OrchestratorConfig::default();
        let settings = HealthSettings::from_config(&config);
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.stale_after(), Duration::from_secs(20));
        assert_eq!(settings.high_load_percent, 95.0);
    }

    #[test]
    fn action_worker_id() {
        assert_eq!(HealthAction::Recovered { id: WorkerId(7) }.worker(), WorkerId(7));
    }
}
