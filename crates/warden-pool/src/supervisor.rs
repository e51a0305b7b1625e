//! Per-worker supervisor task.
//!
//! Owns the worker's process. Forwards reports to the pool, carries out the
//! single stop command the pool may send, and reports the observed exit.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use warden_core::{MetricsReport, WorkerId};

use crate::launcher::{ExitOutcome, WorkerProcess};
use crate::pool::PoolEvent;

/// Instruction from the pool to a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopCommand {
    /// Ask the worker to finish in-flight work, kill it after the timeout.
    Drain(Duration),
    /// Kill immediately. Not counted as a forced kill: nothing was asked
    /// to drain.
    Kill,
}

pub(crate) async fn supervise(
    id: WorkerId,
    mut process: Box<dyn WorkerProcess>,
    mut reports: mpsc::Receiver<MetricsReport>,
    mut stop: oneshot::Receiver<StopCommand>,
    events: mpsc::Sender<PoolEvent>,
) {
    let event = loop {
        tokio::select! {
            Some(report) = reports.recv() => {
                if events.send(PoolEvent::Report { id, report }).await.is_err() {
                    // Pool is gone; nothing left to supervise for.
                    let _ = process.kill().await;
                    return;
                }
            }
            cmd = &mut stop => {
                match cmd {
                    Ok(cmd) => break execute_stop(id, process.as_mut(), cmd).await,
                    Err(_) => {
                        // Sender dropped without a command: pool released the worker.
                        let _ = process.kill().await;
                        return;
                    }
                }
            }
            outcome = process.wait() => {
                let outcome = outcome.unwrap_or_else(|e| {
                    warn!(worker = %id, error = %e, "failed to wait for worker");
                    ExitOutcome { code: None }
                });
                break PoolEvent::Exited { id, outcome, requested: false, forced: false };
            }
        }
    };

    let _ = events.send(event).await;
}

async fn execute_stop(id: WorkerId, process: &mut dyn WorkerProcess, cmd: StopCommand) -> PoolEvent {
    match cmd {
        StopCommand::Kill => {
            if let Err(e) = process.kill().await {
                warn!(worker = %id, error = %e, "failed to kill worker");
            }
            let outcome = wait_or_unknown(id, process).await;
            debug!(worker = %id, code = ?outcome.code, "worker killed");
            PoolEvent::Exited { id, outcome, requested: true, forced: false }
        }
        StopCommand::Drain(timeout) => {
            if let Err(e) = process.request_stop() {
                warn!(worker = %id, error = %e, "failed to signal worker, killing");
                let _ = process.kill().await;
                let outcome = wait_or_unknown(id, process).await;
                return PoolEvent::Exited { id, outcome, requested: true, forced: true };
            }

            match tokio::time::timeout(timeout, process.wait()).await {
                Ok(result) => {
                    let outcome = result.unwrap_or(ExitOutcome { code: None });
                    debug!(worker = %id, code = ?outcome.code, "worker drained");
                    PoolEvent::Exited { id, outcome, requested: true, forced: false }
                }
                Err(_) => {
                    info!(worker = %id, timeout_ms = timeout.as_millis() as u64, "drain timeout exceeded, force-killing worker");
                    if let Err(e) = process.kill().await {
                        warn!(worker = %id, error = %e, "failed to kill worker");
                    }
                    let outcome = wait_or_unknown(id, process).await;
                    PoolEvent::Exited { id, outcome, requested: true, forced: true }
                }
            }
        }
    }
}

async fn wait_or_unknown(id: WorkerId, process: &mut dyn WorkerProcess) -> ExitOutcome {
    process.wait().await.unwrap_or_else(|e| {
        warn!(worker = %id, error = %e, "failed to reap worker");
        ExitOutcome { code: None }
    })
}
