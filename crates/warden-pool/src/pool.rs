//! Worker pool: owns the worker collection and its physical lifecycle.
//!
//! The pool is driven by one control loop: it is the only writer of the
//! collection. Readers get `Arc<[WorkerHandle]>` snapshots through a
//! `watch` channel and never contend with the writer.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use warden_core::{MetricsReport, OrchestratorConfig, WorkerHandle, WorkerId, WorkerStatus};

use crate::error::{PoolError, PoolResult, SpawnError};
use crate::launcher::{ExitOutcome, Launched, Launcher};
use crate::supervisor::{StopCommand, supervise};

/// Capacity of the supervisor → pool event channel.
const EVENT_BUFFER: usize = 1024;

/// Extra time granted after the drain timeout for killed workers to be
/// reaped before the pool gives up on them.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Pool bounds and timings.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub min_workers: u32,
    pub max_workers: u32,
    /// How long a gracefully terminated worker may take to exit.
    pub drain_timeout: Duration,
    /// Upper bound for a single launch.
    pub spawn_timeout: Duration,
    /// Delay before the single retry of a failed spawn.
    pub retry_delay: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            min_workers: config.scaling.min_workers,
            max_workers: config.scaling.max_workers,
            drain_timeout: config.drain_timeout,
            spawn_timeout: config.spawn_timeout,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Message from a supervisor task to the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// The worker pushed a metrics report.
    Report { id: WorkerId, report: MetricsReport },
    /// The worker's OS process exited.
    Exited {
        id: WorkerId,
        outcome: ExitOutcome,
        /// The pool asked for this exit.
        requested: bool,
        /// A graceful drain timed out and the worker was killed.
        forced: bool,
    },
}

/// What applying a `PoolEvent` changed.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolUpdate {
    Reported {
        id: WorkerId,
        /// The report moved the worker from `Starting` to `Ready`.
        became_ready: bool,
    },
    Removed {
        id: WorkerId,
        previous: WorkerStatus,
        /// The exit was not requested by the pool.
        unexpected: bool,
        forced: bool,
        /// Worker spawned to keep the pool at its floor.
        replacement: Option<WorkerId>,
    },
    /// The event referred to a worker that is no longer in the pool.
    Ignored,
}

/// Outcome of draining the whole pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Workers asked to drain.
    pub requested: u32,
    /// Workers that exited on their own within the timeout.
    pub drained: u32,
    /// Workers killed after the timeout.
    pub forced: u32,
    /// Workers whose exit was never observed.
    pub abandoned: u32,
}

impl DrainReport {
    /// All workers exited without being force-killed.
    pub fn is_clean(&self) -> bool {
        self.forced == 0 && self.abandoned == 0
    }
}

struct WorkerEntry {
    handle: WorkerHandle,
    /// Taken when a termination is issued, so at most one is ever in flight.
    stop: Option<oneshot::Sender<StopCommand>>,
}

/// Owns the set of workers.
pub struct WorkerPool {
    launcher: Arc<dyn Launcher>,
    settings: PoolSettings,
    workers: BTreeMap<WorkerId, WorkerEntry>,
    next_id: u64,
    accepting_spawns: bool,
    events_tx: mpsc::Sender<PoolEvent>,
    events_rx: mpsc::Receiver<PoolEvent>,
    snapshot_tx: watch::Sender<Arc<[WorkerHandle]>>,
}

impl WorkerPool {
    /// Create an empty pool.
    pub fn new(launcher: Arc<dyn Launcher>, settings: PoolSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let empty: Arc<[WorkerHandle]> = Arc::from(Vec::new());
        let (snapshot_tx, _) = watch::channel(empty);
        Self {
            launcher,
            settings,
            workers: BTreeMap::new(),
            next_id: 1,
            accepting_spawns: true,
            events_tx,
            events_rx,
            snapshot_tx,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    // ── Spawning ─────────────────────────────────────────────────

    /// Launch one worker and register it as `Starting`.
    pub async fn spawn(&mut self) -> PoolResult<WorkerHandle> {
        self.check_can_spawn()?;
        let id = self.allocate_id();
        let launched =
            launch_with_timeout(self.launcher.as_ref(), id, self.settings.spawn_timeout).await?;
        Ok(self.register(id, launched))
    }

    /// Spawn with the default retry policy: one retry after
    /// `retry_delay`. A second failure is fatal when it leaves the pool
    /// below `min_workers`.
    pub async fn spawn_with_retry(&mut self) -> PoolResult<WorkerHandle> {
        match self.spawn().await {
            Ok(handle) => return Ok(handle),
            Err(PoolError::Spawn(e)) => {
                warn!(error = %e, retry_in_ms = self.settings.retry_delay.as_millis() as u64, "worker spawn failed, retrying");
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(self.settings.retry_delay).await;

        match self.spawn().await {
            Err(PoolError::Spawn(source)) if self.active_count() < self.settings.min_workers => {
                error!(error = %source, active = self.active_count(), min = self.settings.min_workers, "worker spawn failed after retry");
                Err(PoolError::BelowMinimum {
                    active: self.active_count(),
                    min: self.settings.min_workers,
                    source,
                })
            }
            other => other,
        }
    }

    /// Launch up to `count` workers concurrently.
    ///
    /// The count is clamped to the remaining capacity. Each launch is
    /// reported individually.
    pub async fn spawn_batch(&mut self, count: u32) -> Vec<PoolResult<WorkerHandle>> {
        if let Err(e) = self.check_accepting() {
            return vec![Err(e)];
        }
        let room = self.settings.max_workers.saturating_sub(self.active_count());
        let count = count.min(room);

        let mut launches = JoinSet::new();
        for _ in 0..count {
            let id = self.allocate_id();
            let launcher = Arc::clone(&self.launcher);
            let timeout = self.settings.spawn_timeout;
            launches.spawn(async move {
                let result = launch_with_timeout(launcher.as_ref(), id, timeout).await;
                (id, result)
            });
        }

        let mut results = Vec::with_capacity(count as usize);
        while let Some(joined) = launches.join_next().await {
            match joined {
                Ok((id, Ok(launched))) => results.push(Ok(self.register(id, launched))),
                Ok((id, Err(e))) => {
                    warn!(worker = %id, error = %e, "worker launch failed");
                    results.push(Err(PoolError::Spawn(e)));
                }
                Err(e) => {
                    error!(error = %e, "launch task failed");
                    results.push(Err(PoolError::Spawn(SpawnError::Launcher(e.to_string()))));
                }
            }
        }
        results
    }

    /// Refuse all further spawns. Used when the orchestrator starts draining.
    pub fn stop_spawning(&mut self) {
        if self.accepting_spawns {
            self.accepting_spawns = false;
            debug!("pool no longer accepting spawns");
        }
    }

    // ── Termination ──────────────────────────────────────────────

    /// Terminate a worker.
    ///
    /// Graceful termination asks the worker to drain and kills it after
    /// `drain_timeout`; otherwise it is killed immediately. The worker stays
    /// in the pool (as `Terminating`, or `Dead`) until its exit is observed.
    pub fn terminate(&mut self, id: WorkerId, graceful: bool) -> PoolResult<()> {
        let cmd = if graceful {
            StopCommand::Drain(self.settings.drain_timeout)
        } else {
            StopCommand::Kill
        };
        self.send_stop(id, cmd)
    }

    fn send_stop(&mut self, id: WorkerId, cmd: StopCommand) -> PoolResult<()> {
        let entry = self.workers.get_mut(&id).ok_or(PoolError::NotFound(id))?;
        let stop = entry.stop.take().ok_or(PoolError::AlreadyTerminating(id))?;
        if entry.handle.status != WorkerStatus::Dead {
            entry.handle.status = WorkerStatus::Terminating;
        }
        if stop.send(cmd).is_err() {
            // The supervisor already saw the exit; its event is queued.
            debug!(worker = %id, "worker exited before stop command");
        }
        info!(worker = %id, command = ?cmd, "worker termination requested");
        self.publish();
        Ok(())
    }

    /// Gracefully terminate every worker and wait for all exits.
    ///
    /// Workers get `timeout` to exit before their supervisor kills them.
    /// Spawning is disabled first.
    pub async fn drain(&mut self, timeout: Duration) -> DrainReport {
        self.stop_spawning();
        let mut report = DrainReport::default();

        let ids: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, e)| e.stop.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if self.send_stop(id, StopCommand::Drain(timeout)).is_ok() {
                report.requested += 1;
            }
        }
        info!(requested = report.requested, in_pool = self.workers.len(), "draining worker pool");

        let deadline = Instant::now() + timeout + KILL_GRACE;
        while !self.workers.is_empty() {
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(PoolEvent::Exited { id, forced, .. })) => {
                    if self.workers.remove(&id).is_some() {
                        if forced {
                            report.forced += 1;
                        } else {
                            report.drained += 1;
                        }
                        self.publish();
                    }
                }
                Ok(Some(PoolEvent::Report { .. })) => {}
                Ok(None) => break,
                Err(_) => {
                    report.abandoned = self.workers.len() as u32;
                    error!(remaining = report.abandoned, "workers did not exit before drain deadline");
                    break;
                }
            }
        }

        info!(
            drained = report.drained,
            forced = report.forced,
            abandoned = report.abandoned,
            "worker pool drained"
        );
        report
    }

    // ── Events ───────────────────────────────────────────────────

    /// Wait for the next supervisor event.
    pub async fn recv_event(&mut self) -> Option<PoolEvent> {
        self.events_rx.recv().await
    }

    /// Apply a supervisor event to the collection.
    ///
    /// An unexpected exit while the pool is below `min_workers` triggers a
    /// replacement spawn. Only a fatal spawn failure is returned as an error.
    pub async fn handle_event(&mut self, event: PoolEvent) -> PoolResult<PoolUpdate> {
        match event {
            PoolEvent::Report { id, report } => {
                let Some(entry) = self.workers.get_mut(&id) else {
                    return Ok(PoolUpdate::Ignored);
                };
                entry.handle.last_metrics.apply(&report, Instant::now());
                let became_ready = entry.handle.status == WorkerStatus::Starting && report.ready;
                if became_ready {
                    entry.handle.status = WorkerStatus::Ready;
                    info!(worker = %id, "worker ready");
                }
                self.publish();
                Ok(PoolUpdate::Reported { id, became_ready })
            }
            PoolEvent::Exited {
                id,
                outcome,
                requested,
                forced,
            } => {
                let Some(entry) = self.workers.remove(&id) else {
                    return Ok(PoolUpdate::Ignored);
                };
                self.publish();

                let previous = entry.handle.status;
                let unexpected = !requested && entry.stop.is_some();
                let mut replacement = None;

                if !unexpected {
                    debug!(worker = %id, code = ?outcome.code, forced, "worker removed from pool");
                } else {
                    warn!(worker = %id, code = ?outcome.code, status = ?previous, "worker exited unexpectedly");
                    if previous.is_eligible() {
                        replacement = self.replace_if_below_min(id).await?;
                    }
                }

                Ok(PoolUpdate::Removed {
                    id,
                    previous,
                    unexpected,
                    forced,
                    replacement,
                })
            }
        }
    }

    async fn replace_if_below_min(&mut self, lost: WorkerId) -> PoolResult<Option<WorkerId>> {
        let active = self.active_count();
        if !self.accepting_spawns {
            return Ok(None);
        }
        if active >= self.settings.min_workers {
            info!(worker = %lost, active, min = self.settings.min_workers, "pool left at reduced size");
            return Ok(None);
        }
        let handle = self.spawn_with_retry().await?;
        info!(lost = %lost, replacement = %handle.id, "replacement worker spawned");
        Ok(Some(handle.id))
    }

    // ── Status and queries ───────────────────────────────────────

    /// Update a worker's health status.
    ///
    /// Workers that are terminating keep their status. Returns whether
    /// anything changed.
    pub fn set_status(&mut self, id: WorkerId, status: WorkerStatus) -> PoolResult<bool> {
        let entry = self.workers.get_mut(&id).ok_or(PoolError::NotFound(id))?;
        let current = entry.handle.status;
        let allowed = match current {
            WorkerStatus::Terminating | WorkerStatus::Dead => false,
            _ => current != status,
        };
        if !allowed {
            return Ok(false);
        }
        entry.handle.status = status;
        debug!(worker = %id, from = ?current, to = ?status, "worker status changed");
        self.publish();
        Ok(true)
    }

    /// Snapshot of all workers, ordered by id.
    pub fn list(&self) -> Vec<WorkerHandle> {
        self.workers.values().map(|e| e.handle.clone()).collect()
    }

    pub fn get(&self, id: WorkerId) -> Option<WorkerHandle> {
        self.workers.get(&id).map(|e| e.handle.clone())
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<Arc<[WorkerHandle]>> {
        self.snapshot_tx.subscribe()
    }

    /// Workers that count toward the pool size (Starting, Ready, Degraded).
    pub fn active_count(&self) -> u32 {
        self.workers
            .values()
            .filter(|e| e.handle.status.is_active())
            .count() as u32
    }

    /// Every worker still in the collection, including terminating ones.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The eligible worker with the least `(cpu + memory) / 2`.
    ///
    /// Ties go to the most recently started worker, so long-lived workers
    /// keep their warm caches.
    pub fn select_lowest_load(&self) -> Option<WorkerHandle> {
        self.workers
            .values()
            .filter(|e| e.stop.is_some() && e.handle.status.is_eligible())
            .map(|e| &e.handle)
            .min_by(|a, b| {
                a.last_metrics
                    .load()
                    .partial_cmp(&b.last_metrics.load())
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.started_at.cmp(&a.started_at))
                    .then_with(|| b.id.cmp(&a.id))
            })
            .cloned()
    }

    // ── Internal helpers ─────────────────────────────────────────

    fn check_accepting(&self) -> PoolResult<()> {
        if self.accepting_spawns {
            Ok(())
        } else {
            Err(PoolError::Draining)
        }
    }

    fn check_can_spawn(&self) -> PoolResult<()> {
        self.check_accepting()?;
        if self.active_count() >= self.settings.max_workers {
            return Err(PoolError::AtCapacity(self.settings.max_workers));
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> WorkerId {
        let id = WorkerId(self.next_id);
        self.next_id += 1;
        id
    }

    fn register(&mut self, id: WorkerId, launched: Launched) -> WorkerHandle {
        let handle = WorkerHandle::starting(id, launched.process.pid(), Instant::now());
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(supervise(
            id,
            launched.process,
            launched.reports,
            stop_rx,
            self.events_tx.clone(),
        ));

        self.workers.insert(
            id,
            WorkerEntry {
                handle: handle.clone(),
                stop: Some(stop_tx),
            },
        );
        self.publish();
        info!(worker = %id, pid = ?handle.pid, active = self.active_count(), "worker spawned");
        handle
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Arc::from(self.list()));
    }
}

async fn launch_with_timeout(
    launcher: &dyn Launcher,
    id: WorkerId,
    timeout: Duration,
) -> Result<Launched, SpawnError> {
    match tokio::time::timeout(timeout, launcher.launch(id)).await {
        Ok(result) => result,
        Err(_) => Err(SpawnError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeLauncher;

    fn settings(min: u32, max: u32) -> PoolSettings {
        PoolSettings {
            min_workers: min,
            max_workers: max,
            drain_timeout: Duration::from_secs(5),
            spawn_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
        }
    }

    fn report(cpu: f64, mem: f64) -> MetricsReport {
        MetricsReport {
            cpu_percent: cpu,
            memory_percent: mem,
            requests_served: 0,
            errors_observed: 0,
            ready: true,
        }
    }

    fn pool_with(launcher: &FakeLauncher, min: u32, max: u32) -> WorkerPool {
        WorkerPool::new(Arc::new(launcher.clone()), settings(min, max))
    }

    /// Deliver the next pool event and apply it.
    async fn pump(pool: &mut WorkerPool) -> PoolUpdate {
        let event = pool.recv_event().await.unwrap();
        pool.handle_event(event).await.unwrap()
    }

    #[tokio::test]
    async fn spawn_registers_starting_worker() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);

        let handle = pool.spawn().await.unwrap();
        assert_eq!(handle.status, WorkerStatus::Starting);
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.list().len(), 1);
    }

    #[tokio::test]
    async fn spawn_rejected_at_capacity() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 1);

        pool.spawn().await.unwrap();
        assert!(matches!(pool.spawn().await, Err(PoolError::AtCapacity(1))));
    }

    #[tokio::test]
    async fn first_report_marks_ready() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);
        let handle = pool.spawn().await.unwrap();

        launcher.worker(handle.id).unwrap().report(report(10.0, 20.0));
        let update = pump(&mut pool).await;

        assert_eq!(update, PoolUpdate::Reported { id: handle.id, became_ready: true });
        let worker = pool.get(handle.id).unwrap();
        assert_eq!(worker.status, WorkerStatus::Ready);
        assert_eq!(worker.last_metrics.cpu_percent, 10.0);
    }

    #[tokio::test]
    async fn not_ready_report_keeps_starting() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);
        let handle = pool.spawn().await.unwrap();

        let mut r = report(1.0, 1.0);
        r.ready = false;
        launcher.worker(handle.id).unwrap().report(r);
        pump(&mut pool).await;

        assert_eq!(pool.get(handle.id).unwrap().status, WorkerStatus::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_with_retry_recovers_from_one_failure() {
        let launcher = FakeLauncher::new();
        launcher.fail_next(1);
        let mut pool = pool_with(&launcher, 1, 3);

        let handle = pool.spawn_with_retry().await.unwrap();
        assert_eq!(pool.active_count(), 1);
        assert_eq!(launcher.launch_attempts(), 2);
        assert_eq!(handle.status, WorkerStatus::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_with_retry_fatal_below_minimum() {
        let launcher = FakeLauncher::new();
        launcher.fail_next(2);
        let mut pool = pool_with(&launcher, 1, 3);

        let err = pool.spawn_with_retry().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, PoolError::BelowMinimum { active: 0, min: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_with_retry_not_fatal_above_minimum() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);
        pool.spawn().await.unwrap();

        launcher.fail_next(2);
        let err = pool.spawn_with_retry().await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_times_out_on_hung_launch() {
        let launcher = FakeLauncher::new();
        launcher.hang_next(1);
        let mut pool = pool_with(&launcher, 1, 3);

        let started = Instant::now();
        let err = pool.spawn().await.unwrap_err();
        assert!(matches!(err, PoolError::Spawn(SpawnError::Timeout(t)) if t == Duration::from_secs(1)));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_launches_below_minimum_are_fatal() {
        let launcher = FakeLauncher::new();
        launcher.hang_next(2);
        let mut pool = pool_with(&launcher, 1, 3);

        let err = pool.spawn_with_retry().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            PoolError::BelowMinimum { active: 0, min: 1, source: SpawnError::Timeout(_) }
        ));
        assert_eq!(launcher.launch_attempts(), 2);
    }

    #[tokio::test]
    async fn spawn_batch_clamps_to_capacity() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);

        let results = pool.spawn_batch(5).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(pool.active_count(), 3);
    }

    #[tokio::test]
    async fn terminate_removes_only_after_exit_observed() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);
        let handle = pool.spawn().await.unwrap();

        pool.terminate(handle.id, false).unwrap();
        // Still present until the supervisor reports the exit.
        assert_eq!(pool.get(handle.id).unwrap().status, WorkerStatus::Terminating);
        assert_eq!(pool.active_count(), 0);

        let update = pump(&mut pool).await;
        assert!(matches!(
            update,
            PoolUpdate::Removed { unexpected: false, forced: false, .. }
        ));
        assert!(pool.is_empty());
        assert!(launcher.worker(handle.id).unwrap().killed());
    }

    #[tokio::test]
    async fn duplicate_termination_rejected() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);
        let handle = pool.spawn().await.unwrap();

        pool.terminate(handle.id, true).unwrap();
        assert!(matches!(
            pool.terminate(handle.id, false),
            Err(PoolError::AlreadyTerminating(_))
        ));
    }

    #[tokio::test]
    async fn terminate_unknown_worker() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);
        assert!(matches!(
            pool.terminate(WorkerId(42), true),
            Err(PoolError::NotFound(WorkerId(42)))
        ));
    }

    #[tokio::test]
    async fn graceful_terminate_requests_stop() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 3);
        let handle = pool.spawn().await.unwrap();

        pool.terminate(handle.id, true).unwrap();
        let update = pump(&mut pool).await;

        let worker = launcher.worker(handle.id).unwrap();
        assert!(worker.stop_requested());
        assert!(!worker.killed());
        assert!(matches!(update, PoolUpdate::Removed { forced: false, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_terminate_kills_after_drain_timeout() {
        let launcher = FakeLauncher::new();
        launcher.set_ignore_stop(true);
        let mut pool = pool_with(&launcher, 1, 3);
        let handle = pool.spawn().await.unwrap();

        pool.terminate(handle.id, true).unwrap();
        let update = pump(&mut pool).await;

        assert!(matches!(update, PoolUpdate::Removed { forced: true, .. }));
        assert!(launcher.worker(handle.id).unwrap().killed());
    }

    #[tokio::test]
    async fn unexpected_exit_below_min_respawns() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 2, 4);
        let a = pool.spawn().await.unwrap();
        let b = pool.spawn().await.unwrap();
        for id in [a.id, b.id] {
            launcher.worker(id).unwrap().report(report(10.0, 10.0));
            pump(&mut pool).await;
        }

        launcher.worker(a.id).unwrap().crash(1);
        let update = pump(&mut pool).await;

        match update {
            PoolUpdate::Removed { id, unexpected, replacement, .. } => {
                assert_eq!(id, a.id);
                assert!(unexpected);
                assert!(replacement.is_some());
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert_eq!(pool.active_count(), 2);
    }

    #[tokio::test]
    async fn unexpected_exit_above_min_leaves_pool_reduced() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 4);
        let a = pool.spawn().await.unwrap();
        let b = pool.spawn().await.unwrap();
        for id in [a.id, b.id] {
            launcher.worker(id).unwrap().report(report(10.0, 10.0));
            pump(&mut pool).await;
        }

        launcher.worker(a.id).unwrap().crash(1);
        let update = pump(&mut pool).await;

        assert!(matches!(update, PoolUpdate::Removed { replacement: None, .. }));
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn select_lowest_load_picks_least_loaded() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 4);
        let a = pool.spawn().await.unwrap();
        let b = pool.spawn().await.unwrap();

        launcher.worker(a.id).unwrap().report(report(10.0, 20.0));
        pump(&mut pool).await;
        launcher.worker(b.id).unwrap().report(report(5.0, 15.0));
        pump(&mut pool).await;

        assert_eq!(pool.select_lowest_load().unwrap().id, b.id);
    }

    #[tokio::test(start_paused = true)]
    async fn select_lowest_load_tie_prefers_newest() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 4);
        let old = pool.spawn().await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        let new = pool.spawn().await.unwrap();

        for id in [old.id, new.id] {
            launcher.worker(id).unwrap().report(report(20.0, 20.0));
            pump(&mut pool).await;
        }

        assert_eq!(pool.select_lowest_load().unwrap().id, new.id);
    }

    #[tokio::test]
    async fn select_lowest_load_skips_ineligible() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 4);
        pool.spawn().await.unwrap();

        // Still Starting: not eligible.
        assert!(pool.select_lowest_load().is_none());
    }

    #[tokio::test]
    async fn set_status_ignored_while_terminating() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 4);
        let handle = pool.spawn().await.unwrap();

        assert!(pool.set_status(handle.id, WorkerStatus::Degraded).unwrap());
        pool.terminate(handle.id, true).unwrap();
        assert!(!pool.set_status(handle.id, WorkerStatus::Ready).unwrap());
    }

    #[tokio::test]
    async fn subscribers_see_snapshots() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 4);
        let rx = pool.subscribe();

        pool.spawn().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }

    #[tokio::test]
    async fn drain_terminates_everything() {
        let launcher = FakeLauncher::new();
        let mut pool = pool_with(&launcher, 1, 4);
        pool.spawn_batch(4).await;

        let report = pool.drain(Duration::from_secs(5)).await;
        assert_eq!(report.requested, 4);
        assert_eq!(report.drained, 4);
        assert!(report.is_clean());
        assert!(pool.is_empty());
        assert!(matches!(pool.spawn().await, Err(PoolError::Draining)));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_reports_forced_kills() {
        let launcher = FakeLauncher::new();
        launcher.set_ignore_stop(true);
        let mut pool = pool_with(&launcher, 1, 4);
        pool.spawn_batch(2).await;

        let report = pool.drain(Duration::from_secs(5)).await;
        assert_eq!(report.forced, 2);
        assert!(!report.is_clean());
    }
}
