//! Wire format of coordination messages.

use serde::{Deserialize, Serialize};

use warden_core::{ClusterSnapshot, Direction, WorkerId};

/// What triggered a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterEvent {
    Health,
    ScaleUp,
    ScaleDown,
    /// A worker stayed over the high-load bound and was marked degraded.
    WorkerDegraded,
}

impl ClusterEvent {
    /// Event for an executed scaling decision. `None` for `Direction::None`.
    pub fn from_direction(direction: Direction) -> Option<Self> {
        match direction {
            Direction::Up => Some(Self::ScaleUp),
            Direction::Down => Some(Self::ScaleDown),
            Direction::None => None,
        }
    }
}

/// One instance's view of its pool, as seen by its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMessage {
    pub instance_id: String,
    pub worker_count: u32,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    /// Unix millis.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<ClusterEvent>,
    /// Worker the event is about, for per-worker events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl ClusterMessage {
    pub fn from_snapshot(instance_id: &str, snapshot: &ClusterSnapshot, event: Option<ClusterEvent>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            worker_count: snapshot.worker_count,
            avg_cpu: snapshot.avg_cpu,
            avg_memory: snapshot.avg_memory,
            timestamp: snapshot.timestamp_ms,
            event,
            worker: None,
        }
    }

    /// Attach the worker a per-worker event refers to.
    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker.to_string());
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
