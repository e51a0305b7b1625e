//! The orchestrator: owns every component and runs the control loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use warden_autoscale::ScalingPolicy;
use warden_coord::{ClusterEvent, ClusterMessage, CoordinationChannel, Coordinator, CoordinatorSettings};
use warden_core::{ClusterSnapshot, Direction, OrchestratorConfig, ScalingDecision, WorkerId, WorkerStatus};
use warden_health::{HealthAction, HealthMonitor, HealthSettings};
use warden_metrics::{MetricsAggregator, aggregate};
use warden_pool::{DrainReport, Launcher, PoolError, PoolEvent, PoolSettings, PoolUpdate, WorkerPool};

use crate::error::{LifecycleError, LifecycleResult};
use crate::status::{Phase, StatusHandle};

/// How `run()` ended.
#[derive(Debug)]
pub struct ShutdownReport {
    pub drain: DrainReport,
    /// The fatal error that forced the shutdown, if any.
    pub failure: Option<LifecycleError>,
}

impl ShutdownReport {
    /// No fatal error, and every worker drained without a forced kill.
    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && self.drain.is_clean()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_clean() { 0 } else { 1 }
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    pool: WorkerPool,
    health: HealthMonitor,
    metrics: MetricsAggregator,
    policy: ScalingPolicy,
    coordinator: Coordinator,
    phase_tx: watch::Sender<Phase>,
    snapshot_tx: watch::Sender<Option<ClusterSnapshot>>,
    decision_tx: watch::Sender<Option<ScalingDecision>>,
}

impl Orchestrator {
    /// Build an orchestrator from a validated config.
    ///
    /// Starts the coordinator's background tasks, so it must be called
    /// inside a tokio runtime.
    pub fn new(
        config: OrchestratorConfig,
        launcher: Arc<dyn Launcher>,
        channel: Arc<dyn CoordinationChannel>,
    ) -> LifecycleResult<Self> {
        config.validate()?;

        let pool = WorkerPool::new(launcher, PoolSettings::from_config(&config));
        let health = HealthMonitor::new(HealthSettings::from_config(&config));
        let policy = ScalingPolicy::new(config.scaling.clone());
        let coordinator = Coordinator::start(channel, CoordinatorSettings::from_config(&config));
        let (phase_tx, _) = watch::channel(Phase::Starting);
        let (snapshot_tx, _) = watch::channel(None);
        let (decision_tx, _) = watch::channel(None);

        Ok(Self {
            config,
            pool,
            health,
            metrics: MetricsAggregator::new(),
            policy,
            coordinator,
            phase_tx,
            snapshot_tx,
            decision_tx,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn status(&self) -> StatusHandle {
        StatusHandle {
            instance_id: Arc::from(self.config.instance_id.as_str()),
            phase: self.phase_tx.subscribe(),
            workers: self.pool.subscribe(),
            snapshot: self.snapshot_tx.subscribe(),
            decision: self.decision_tx.subscribe(),
            peers: self.coordinator.peers_handle(),
        }
    }

    /// Run until `shutdown` resolves or a fatal error occurs, then drain.
    pub async fn run<F>(mut self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()> + Send,
    {
        let mut shutdown = std::pin::pin!(shutdown);

        info!(
            instance = %self.config.instance_id,
            min = self.config.scaling.min_workers,
            max = self.config.scaling.max_workers,
            "orchestrator starting"
        );

        let failure = match self.start_workers(shutdown.as_mut()).await {
            Ok(true) => self.run_loop(shutdown.as_mut()).await.err(),
            Ok(false) => None,
            Err(e) => Some(e),
        };
        if let Some(e) = &failure {
            error!(error = %e, "fatal error, shutting down");
        }

        self.set_phase(Phase::Draining);
        let drain = self.pool.drain(self.config.drain_timeout).await;

        self.set_phase(Phase::Stopped);
        self.coordinator.shutdown().await;

        let report = ShutdownReport { drain, failure };
        info!(
            drained = report.drain.drained,
            forced = report.drain.forced,
            abandoned = report.drain.abandoned,
            clean = report.is_clean(),
            "orchestrator stopped"
        );
        report
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            info!(from = %previous, to = %phase, "orchestrator phase changed");
        }
    }

    // ── Starting ─────────────────────────────────────────────────

    /// Spawn the minimum pool and wait for it to become ready.
    ///
    /// Returns `false` if shutdown was requested meanwhile.
    async fn start_workers<F>(&mut self, mut shutdown: Pin<&mut F>) -> LifecycleResult<bool>
    where
        F: Future<Output = ()> + Send,
    {
        let min = self.config.scaling.min_workers;
        for result in self.pool.spawn_batch(min).await {
            if let Err(e) = result {
                warn!(error = %e, "initial worker spawn failed");
            }
        }
        self.ensure_minimum().await?;

        let deadline = Instant::now() + self.config.startup_timeout;
        while !self.all_ready() {
            tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    info!("shutdown requested during startup");
                    return Ok(false);
                }
                event = self.pool.recv_event() => {
                    if let Some(event) = event {
                        self.apply_event(event).await?;
                        self.ensure_minimum().await?;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.replace_stragglers().await?;
                    break;
                }
            }
        }

        self.set_phase(Phase::Running);
        Ok(true)
    }

    fn all_ready(&self) -> bool {
        self.pool.active_count() >= self.config.scaling.min_workers
            && self.pool.list().iter().all(|w| w.status != WorkerStatus::Starting)
    }

    async fn replace_stragglers(&mut self) -> LifecycleResult<()> {
        let stragglers: Vec<_> = self
            .pool
            .list()
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Starting)
            .map(|w| w.id)
            .collect();
        for id in stragglers {
            warn!(
                worker = %id,
                timeout_ms = self.config.startup_timeout.as_millis() as u64,
                "worker not ready before startup timeout, replacing"
            );
            self.kill_worker(id);
        }
        self.ensure_minimum().await
    }

    // ── Running ──────────────────────────────────────────────────

    async fn run_loop<F>(&mut self, mut shutdown: Pin<&mut F>) -> LifecycleResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let health_every = self.config.scaling.health_check_interval;
        let scale_every = self.config.scaling.scale_evaluation_interval;
        let mut health_tick = tokio::time::interval_at(Instant::now() + health_every, health_every);
        let mut scale_tick = tokio::time::interval_at(Instant::now() + scale_every, scale_every);
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        scale_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.publish_health(Instant::now());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                event = self.pool.recv_event() => {
                    if let Some(event) = event {
                        self.apply_event(event).await?;
                    }
                }
                _ = health_tick.tick() => self.health_tick().await?,
                _ = scale_tick.tick() => self.scale_tick().await?,
            }
        }
    }

    async fn apply_event(&mut self, event: PoolEvent) -> LifecycleResult<()> {
        match self.pool.handle_event(event).await {
            Ok(PoolUpdate::Removed {
                id,
                unexpected: true,
                replacement,
                ..
            }) => {
                debug!(worker = %id, replacement = ?replacement.map(|r| r.to_string()), "unexpected exit handled");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "failed to apply worker event");
                Ok(())
            }
        }
    }

    async fn health_tick(&mut self) -> LifecycleResult<()> {
        let now = Instant::now();
        let workers = self.pool.list();

        for action in self.health.check(&workers, now) {
            match action {
                HealthAction::MarkDead { id, silent_for } => {
                    warn!(worker = %id, silent_ms = silent_for.as_millis() as u64, "worker unhealthy, killing");
                    let _ = self.pool.set_status(id, WorkerStatus::Dead);
                    self.kill_worker(id);
                }
                HealthAction::MarkDegraded { id, .. } => {
                    if let Ok(true) = self.pool.set_status(id, WorkerStatus::Degraded) {
                        self.publish_worker_event(id, ClusterEvent::WorkerDegraded, now);
                    }
                }
                HealthAction::Recovered { id } => {
                    let _ = self.pool.set_status(id, WorkerStatus::Ready);
                }
            }
        }

        self.ensure_minimum().await?;
        self.publish_health(now);
        Ok(())
    }

    async fn scale_tick(&mut self) -> LifecycleResult<()> {
        let now = Instant::now();
        let snapshot = self.metrics.observe(&self.pool.list(), now);
        self.snapshot_tx.send_replace(Some(snapshot.clone()));

        let workers = self.pool.active_count();
        let mut decision = self.policy.evaluate(&snapshot, workers, now);

        match decision.direction {
            Direction::Up => {
                self.policy.record_execution(now);
                info!(workers, reason = %decision.reason, "scaling up");
                match self.pool.spawn_with_retry().await {
                    Ok(handle) => debug!(worker = %handle.id, "scale-up worker spawned"),
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => warn!(error = %e, "scale-up spawn failed"),
                }
            }
            Direction::Down => match self.pool.select_lowest_load() {
                Some(victim) => {
                    self.policy.record_execution(now);
                    info!(
                        workers,
                        worker = %victim.id,
                        load = victim.last_metrics.load(),
                        reason = %decision.reason,
                        "scaling down"
                    );
                    if let Err(e) = self.pool.terminate(victim.id, true) {
                        warn!(worker = %victim.id, error = %e, "scale-down termination failed");
                    }
                }
                None => {
                    debug!("no worker eligible for scale-down");
                    decision = ScalingDecision::none("no worker eligible for scale-down");
                }
            },
            Direction::None => debug!(reason = %decision.reason, "no scaling action"),
        }

        if let Some(event) = ClusterEvent::from_direction(decision.direction) {
            let after = aggregate(&self.pool.list(), Some(&snapshot), now);
            self.coordinator
                .offer(ClusterMessage::from_snapshot(&self.config.instance_id, &after, Some(event)));
        }
        self.decision_tx.send_replace(Some(decision));
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Kill a worker immediately. Already terminating workers are left alone.
    fn kill_worker(&mut self, id: WorkerId) {
        match self.pool.terminate(id, false) {
            Ok(()) | Err(PoolError::AlreadyTerminating(_)) | Err(PoolError::NotFound(_)) => {}
            Err(e) => warn!(worker = %id, error = %e, "failed to kill worker"),
        }
    }

    /// Spawn workers until the pool is back at `min_workers`.
    async fn ensure_minimum(&mut self) -> LifecycleResult<()> {
        let min = self.config.scaling.min_workers;
        while self.pool.active_count() < min {
            match self.pool.spawn_with_retry().await {
                Ok(handle) => info!(worker = %handle.id, active = self.pool.active_count(), min, "worker spawned to restore minimum"),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "could not restore minimum pool size");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn publish_worker_event(&self, id: WorkerId, event: ClusterEvent, now: Instant) {
        let snapshot = aggregate(&self.pool.list(), self.metrics.latest(), now);
        self.coordinator.offer(
            ClusterMessage::from_snapshot(&self.config.instance_id, &snapshot, Some(event)).with_worker(id),
        );
    }

    fn publish_health(&self, now: Instant) {
        let snapshot = aggregate(&self.pool.list(), self.metrics.latest(), now);
        self.coordinator.offer(ClusterMessage::from_snapshot(
            &self.config.instance_id,
            &snapshot,
            Some(ClusterEvent::Health),
        ));
        self.snapshot_tx.send_replace(Some(snapshot));
    }
}
