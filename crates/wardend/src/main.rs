//! wardend: the warden daemon.
//!
//! Loads the configuration, starts the orchestrator with real worker
//! processes, optionally serves the status surface, and exits once the pool
//! has drained.
//!
//! # Usage
//!
//! ```text
//! wardend --config /etc/warden.toml --status-port 9090
//! ```
//!
//! Exit code is 0 when every worker drained within `drain_timeout`, 1
//! otherwise.

mod cli;
mod coordination;
mod signal;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warden_core::OrchestratorConfig;
use warden_lifecycle::Orchestrator;
use warden_pool::ProcessLauncher;

use crate::cli::Cli;
use crate::signal::ShutdownSignals;

const DEFAULT_FILTER: &str = "info,wardend=debug,warden=debug";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = OrchestratorConfig::load(cli.config.as_deref()).context("invalid configuration")?;
    info!(
        instance = %config.instance_id,
        program = %config.worker.program,
        min = config.scaling.min_workers,
        max = config.scaling.max_workers,
        "configuration loaded"
    );

    let code = run(cli, config).await?;
    Ok(ExitCode::from(code))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli, config: OrchestratorConfig) -> anyhow::Result<u8> {
    let mut signals = ShutdownSignals::install().context("failed to install signal handlers")?;
    let launcher = Arc::new(ProcessLauncher::new(&config)?);
    let channel = coordination::open_channel(&config).await?;
    let orchestrator = Orchestrator::new(config, launcher, channel)?;

    // ── Status surface ─────────────────────────────────────────

    let (stopped_tx, stopped_rx) = watch::channel(false);
    let server = match cli.status_port {
        Some(port) => {
            let addr = SocketAddr::new(cli.status_bind, port);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind status port {addr}"))?;
            info!(%addr, "status API listening");

            let router = warden_api::build_router(orchestrator.status());
            let mut stopped = stopped_rx;
            Some(tokio::spawn(async move {
                let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                    let _ = stopped.changed().await;
                });
                if let Err(e) = serve.await {
                    error!(error = %e, "status API failed");
                }
            }))
        }
        None => None,
    };

    // ── Run until signalled ────────────────────────────────────

    let report = orchestrator
        .run(async move {
            let name = signals.recv().await;
            info!(signal = name, "shutdown signal received, draining");
        })
        .await;

    let _ = stopped_tx.send(true);
    if let Some(server) = server {
        let _ = server.await;
    }

    if let Some(failure) = &report.failure {
        error!(error = %failure, "orchestrator stopped on error");
    }
    info!(
        drained = report.drain.drained,
        forced = report.drain.forced,
        exit_code = report.exit_code(),
        "wardend stopped"
    );
    Ok(report.exit_code() as u8)
}
