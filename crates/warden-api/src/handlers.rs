//! Status handlers.
//!
//! Every handler reads through the `StatusHandle`; none of them touch the
//! control loop.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use warden_core::ClusterSnapshot;
use warden_lifecycle::Phase;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /status
pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.status.status())
}

/// GET /workers
pub async fn list_workers(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.status.workers())
}

#[derive(Serialize)]
struct Liveness {
    instance_id: String,
    phase: Phase,
}

/// GET /healthz
///
/// Fails once the orchestrator has started draining.
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let phase = state.status.phase();
    if phase >= Phase::Draining {
        debug!(%phase, "liveness probe failing");
        return error_response(&format!("orchestrator {phase}"), StatusCode::SERVICE_UNAVAILABLE)
            .into_response();
    }
    ApiResponse::ok(Liveness {
        instance_id: state.status.instance_id().to_string(),
        phase,
    })
    .into_response()
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state
        .status
        .snapshot()
        .unwrap_or_else(|| ClusterSnapshot::empty(Instant::now()));
    let body = warden_metrics::render_prometheus(&snapshot, &state.status.workers());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
