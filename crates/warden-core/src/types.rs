//! Domain types for the orchestrator.
//!
//! `WorkerHandle` is owned by the worker pool; every other component only
//! ever sees cloned snapshots of it. `ClusterSnapshot` and
//! `ScalingDecision` are derived values that are replaced, never mutated.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ── Worker ────────────────────────────────────────────────────────

/// Identifier of a worker, unique within one orchestrator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w-{}", self.0)
    }
}

/// Lifecycle status of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Ready,
    Degraded,
    Terminating,
    Dead,
}

impl WorkerStatus {
    /// Whether a worker in this status contributes to aggregate metrics.
    pub fn is_eligible(self) -> bool {
        matches!(self, WorkerStatus::Ready | WorkerStatus::Degraded)
    }

    /// Whether a worker in this status counts toward the pool size.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            WorkerStatus::Starting | WorkerStatus::Ready | WorkerStatus::Degraded
        )
    }
}

/// A metrics report pushed by a worker process.
///
/// Workers write one of these as a JSON line on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Monotonic counter of requests served since the worker started.
    pub requests_served: u64,
    /// Monotonic counter of errors observed since the worker started.
    pub errors_observed: u64,
    /// Whether the worker is ready to take traffic.
    #[serde(default = "default_ready")]
    pub ready: bool,
}

fn default_ready() -> bool {
    true
}

/// Last-known metrics of a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub requests_served: u64,
    pub errors_observed: u64,
    /// Monotonic time of the last report (spawn time until the first one).
    #[serde(skip)]
    pub last_report_at: Instant,
    /// Wall-clock time of the last report, unix millis (0 = never).
    pub last_report_ms: u64,
}

impl WorkerMetrics {
    /// Empty metrics for a freshly spawned worker.
    pub fn new(now: Instant) -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            requests_served: 0,
            errors_observed: 0,
            last_report_at: now,
            last_report_ms: 0,
        }
    }

    /// Average of CPU and memory utilisation, used for scale-down selection.
    pub fn load(&self) -> f64 {
        (self.cpu_percent + self.memory_percent) / 2.0
    }

    /// Fold a new report into the metrics.
    pub fn apply(&mut self, report: &MetricsReport, now: Instant) {
        self.cpu_percent = report.cpu_percent;
        self.memory_percent = report.memory_percent;
        self.requests_served = report.requests_served;
        self.errors_observed = report.errors_observed;
        self.last_report_at = now;
        self.last_report_ms = epoch_millis();
    }
}

/// Read-only view of one running worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerHandle {
    pub id: WorkerId,
    /// OS process id, when the launcher exposes one.
    pub pid: Option<u32>,
    #[serde(skip)]
    pub started_at: Instant,
    /// Wall-clock spawn time, unix millis.
    pub started_at_ms: u64,
    pub status: WorkerStatus,
    pub last_metrics: WorkerMetrics,
}

impl WorkerHandle {
    /// Create a handle for a worker that was just launched.
    pub fn starting(id: WorkerId, pid: Option<u32>, now: Instant) -> Self {
        Self {
            id,
            pid,
            started_at: now,
            started_at_ms: epoch_millis(),
            status: WorkerStatus::Starting,
            last_metrics: WorkerMetrics::new(now),
        }
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// Point-in-time aggregate over all eligible workers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    /// Number of eligible (Ready/Degraded) workers.
    pub worker_count: u32,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub request_rate_per_minute: f64,
    pub error_rate_percent: f64,
    #[serde(skip)]
    pub taken_at: Instant,
    /// Wall-clock time of the snapshot, unix millis.
    pub timestamp_ms: u64,
    /// Request counter of each eligible worker at `taken_at`, the baseline
    /// for the next rate.
    #[serde(skip)]
    pub worker_requests: BTreeMap<WorkerId, u64>,
}

impl ClusterSnapshot {
    /// A snapshot with no eligible workers.
    pub fn empty(now: Instant) -> Self {
        Self {
            worker_count: 0,
            avg_cpu: 0.0,
            avg_memory: 0.0,
            total_requests: 0,
            total_errors: 0,
            request_rate_per_minute: 0.0,
            error_rate_percent: 0.0,
            taken_at: now,
            timestamp_ms: epoch_millis(),
            worker_requests: BTreeMap::new(),
        }
    }
}

// ── Scaling ───────────────────────────────────────────────────────

/// Direction of a scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    None,
}

/// Outcome of one scaling policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingDecision {
    pub direction: Direction,
    /// Human-readable justification, for audit logs.
    pub reason: String,
    /// Wall-clock time of the evaluation, unix millis.
    pub timestamp_ms: u64,
}

impl ScalingDecision {
    pub fn up(reason: impl Into<String>) -> Self {
        Self::with(Direction::Up, reason)
    }

    pub fn down(reason: impl Into<String>) -> Self {
        Self::with(Direction::Down, reason)
    }

    pub fn none(reason: impl Into<String>) -> Self {
        Self::with(Direction::None, reason)
    }

    fn with(direction: Direction, reason: impl Into<String>) -> Self {
        Self {
            direction,
            reason: reason.into(),
            timestamp_ms: epoch_millis(),
        }
    }

    /// Whether this decision requires a pool change.
    pub fn is_action(&self) -> bool {
        self.direction != Direction::None
    }
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
