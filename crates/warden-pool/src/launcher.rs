//! Worker launch: starting OS processes and wiring up their report stream.
//!
//! Workers push metrics by writing one JSON `MetricsReport` per line on
//! stdout. Lines that do not parse are treated as ordinary program output.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use warden_core::{ConfigError, MetricsReport, OrchestratorConfig, WorkerCommand, WorkerId};

use crate::error::SpawnError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Buffered reports per worker. When the buffer is full the incoming
/// report is dropped and stdout keeps draining; the worker's next report
/// carries fresh figures.
const REPORT_BUFFER: usize = 64;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// An OS process (or stand-in) running one worker.
///
/// Owned exclusively by that worker's supervisor task.
pub trait WorkerProcess: Send + 'static {
    /// OS process id, if there is one.
    fn pid(&self) -> Option<u32>;

    /// Ask the worker to stop accepting work and exit once in-flight
    /// requests are done.
    fn request_stop(&mut self) -> std::io::Result<()>;

    /// Kill the worker immediately and reap it.
    fn kill(&mut self) -> BoxFuture<'_, std::io::Result<()>>;

    /// Wait for the worker to exit. Must be cancel safe.
    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<ExitOutcome>>;
}

/// A freshly launched worker.
pub struct Launched {
    pub process: Box<dyn WorkerProcess>,
    pub reports: mpsc::Receiver<MetricsReport>,
}

/// Starts worker processes.
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self, id: WorkerId) -> BoxFuture<'_, Result<Launched, SpawnError>>;
}

// ── OS processes ──────────────────────────────────────────────────

/// Launches the configured worker program as a child process.
pub struct ProcessLauncher {
    command: WorkerCommand,
    instance_id: String,
}

impl ProcessLauncher {
    /// Create a launcher from the orchestrator config.
    pub fn new(config: &OrchestratorConfig) -> Result<Self, ConfigError> {
        if config.worker.program.trim().is_empty() {
            return Err(ConfigError::MissingProgram);
        }
        Ok(Self {
            command: config.worker.clone(),
            instance_id: config.instance_id.clone(),
        })
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, id: WorkerId) -> BoxFuture<'_, Result<Launched, SpawnError>> {
        Box::pin(async move {
            let mut cmd = Command::new(&self.command.program);
            cmd.args(&self.command.args)
                .envs(&self.command.env)
                .env("WARDEN_WORKER_ID", id.to_string())
                .env("WARDEN_INSTANCE_ID", &self.instance_id)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true);

            let mut child = cmd.spawn().map_err(|source| SpawnError::Launch {
                program: self.command.program.clone(),
                source,
            })?;
            let stdout = child.stdout.take().ok_or(SpawnError::NoStdout)?;

            let (tx, rx) = mpsc::channel(REPORT_BUFFER);
            tokio::spawn(read_reports(id, stdout, tx));

            info!(worker = %id, pid = ?child.id(), program = %self.command.program, "worker process launched");
            Ok(Launched {
                process: Box::new(ChildProcess { child }),
                reports: rx,
            })
        })
    }
}

/// Forward JSON report lines from a worker's stdout.
async fn read_reports<R>(id: WorkerId, stdout: R, tx: mpsc::Sender<MetricsReport>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<MetricsReport>(&line) {
                Ok(report) => {
                    if tx.is_closed() {
                        break;
                    }
                    if tx.try_send(report).is_err() {
                        debug!(worker = %id, "report buffer full, dropping report");
                    }
                }
                Err(_) => debug!(worker = %id, output = %line, "worker output"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(worker = %id, error = %e, "failed to read worker stdout");
                break;
            }
        }
    }
    debug!(worker = %id, "worker stdout closed");
}

struct ChildProcess {
    child: Child,
}

impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> std::io::Result<()> {
        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };
        // SAFETY: plain syscall on a pid we own; no memory is shared.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> std::io::Result<()> {
        // No graceful signal available; the drain degrades to a kill.
        self.child.start_kill()
    }

    fn kill(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(self.child.kill())
    }

    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<ExitOutcome>> {
        Box::pin(async move {
            let status = self.child.wait().await?;
            Ok(ExitOutcome {
                code: status.code(),
            })
        })
    }
}
