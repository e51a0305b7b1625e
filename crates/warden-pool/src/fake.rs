//! In-memory launcher for driving the pool without real processes.
//!
//! Each launched fake worker can be made to push reports, crash, or ignore
//! stop requests, and records what the pool asked of it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

use warden_core::{MetricsReport, WorkerId};

use crate::error::SpawnError;
use crate::launcher::{BoxFuture, ExitOutcome, Launched, Launcher, WorkerProcess};

#[derive(Default)]
struct FakeState {
    workers: HashMap<WorkerId, FakeWorker>,
    launched: Vec<WorkerId>,
    attempts: u32,
    fail_next: u32,
    hang_next: u32,
    ignore_stop: bool,
}

/// Launcher that creates `FakeWorker`s.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` launches fail.
    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Make the next `n` launches never complete.
    pub fn hang_next(&self, n: u32) {
        self.lock().hang_next = n;
    }

    /// Workers launched from now on ignore graceful stop requests.
    pub fn set_ignore_stop(&self, ignore: bool) {
        self.lock().ignore_stop = ignore;
    }

    /// Control handle of a launched worker.
    pub fn worker(&self, id: WorkerId) -> Option<FakeWorker> {
        self.lock().workers.get(&id).cloned()
    }

    /// Ids of all successfully launched workers, in launch order.
    pub fn launched(&self) -> Vec<WorkerId> {
        self.lock().launched.clone()
    }

    /// Launch attempts, including failed ones.
    pub fn launch_attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Push the same report from every worker that is still running.
    pub fn report_all(&self, report: MetricsReport) {
        let workers: Vec<FakeWorker> = self.lock().workers.values().cloned().collect();
        for worker in workers.iter().filter(|w| !w.exited()) {
            worker.report(report.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, id: WorkerId) -> BoxFuture<'_, Result<Launched, SpawnError>> {
        Box::pin(async move {
            let hang = {
                let mut state = self.lock();
                state.attempts += 1;
                let hang = state.hang_next > 0;
                state.hang_next = state.hang_next.saturating_sub(1);
                hang
            };
            if hang {
                std::future::pending::<()>().await;
            }

            let mut state = self.lock();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(SpawnError::Launcher(format!("injected failure for {id}")));
            }

            let (reports_tx, reports_rx) = mpsc::channel(64);
            let (exit_tx, exit_rx) = watch::channel(None);
            let worker = FakeWorker {
                id,
                reports: reports_tx,
                exit: Arc::new(exit_tx),
                stop_requested: Arc::new(AtomicBool::new(false)),
                killed: Arc::new(AtomicBool::new(false)),
                ignore_stop: state.ignore_stop,
            };
            state.workers.insert(id, worker.clone());
            state.launched.push(id);

            Ok(Launched {
                process: Box::new(FakeProcess { worker, exit: exit_rx }),
                reports: reports_rx,
            })
        })
    }
}

/// Test-side control of one fake worker.
#[derive(Clone)]
pub struct FakeWorker {
    pub id: WorkerId,
    reports: mpsc::Sender<MetricsReport>,
    exit: Arc<watch::Sender<Option<ExitOutcome>>>,
    stop_requested: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
    ignore_stop: bool,
}

impl FakeWorker {
    /// Push a metrics report to the pool.
    pub fn report(&self, report: MetricsReport) {
        let _ = self.reports.try_send(report);
    }

    /// Exit with the given code without being asked to.
    pub fn crash(&self, code: i32) {
        self.finish(ExitOutcome { code: Some(code) });
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    fn finish(&self, outcome: ExitOutcome) {
        self.exit.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        });
    }
}

struct FakeProcess {
    worker: FakeWorker,
    exit: watch::Receiver<Option<ExitOutcome>>,
}

impl WorkerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(10_000 + self.worker.id.0 as u32)
    }

    fn request_stop(&mut self) -> std::io::Result<()> {
        self.worker.stop_requested.store(true, Ordering::SeqCst);
        if !self.worker.ignore_stop {
            self.worker.finish(ExitOutcome { code: Some(0) });
        }
        Ok(())
    }

    fn kill(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.worker.killed.store(true, Ordering::SeqCst);
            self.worker.finish(ExitOutcome { code: None });
            Ok(())
        })
    }

    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<ExitOutcome>> {
        Box::pin(async move {
            let outcome = *self
                .exit
                .wait_for(|exit| exit.is_some())
                .await
                .map_err(|_| std::io::Error::other("fake worker dropped"))?;
            Ok(outcome.unwrap_or(ExitOutcome { code: None }))
        })
    }
}
