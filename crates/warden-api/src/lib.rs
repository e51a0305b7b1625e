//! warden-api: read-only HTTP status surface for an orchestrator.
//!
//! Serves the same view as `StatusHandle::status()`, plus a liveness probe
//! and Prometheus exposition. Nothing here can change the pool.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/status` | Phase, cluster snapshot, workers, last decision, peers |
//! | GET | `/workers` | Current workers |
//! | GET | `/healthz` | 200 while starting or running, 503 once draining |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use axum::Router;
use axum::routing::get;
use warden_lifecycle::StatusHandle;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub status: StatusHandle,
}

/// Build the status router.
pub fn build_router(status: StatusHandle) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/workers", get(handlers::list_workers))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(ApiState { status })
}
