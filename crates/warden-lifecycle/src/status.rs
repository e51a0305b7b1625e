//! Read-only status of a running orchestrator.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use warden_coord::{PeerStatus, PeersHandle};
use warden_core::{ClusterSnapshot, ScalingDecision, WorkerHandle};

/// Orchestrator lifecycle phase. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time status, as served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub instance_id: String,
    pub phase: Phase,
    pub snapshot: Option<ClusterSnapshot>,
    pub workers: Vec<WorkerHandle>,
    pub last_decision: Option<ScalingDecision>,
    pub peers: Vec<PeerStatus>,
}

/// Clone-able accessor for an orchestrator's status.
///
/// Reads never block the control loop, and keep working after it stopped.
#[derive(Clone)]
pub struct StatusHandle {
    pub(crate) instance_id: Arc<str>,
    pub(crate) phase: watch::Receiver<Phase>,
    pub(crate) workers: watch::Receiver<Arc<[WorkerHandle]>>,
    pub(crate) snapshot: watch::Receiver<Option<ClusterSnapshot>>,
    pub(crate) decision: watch::Receiver<Option<ScalingDecision>>,
    pub(crate) peers: PeersHandle,
}

impl StatusHandle {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.workers.borrow().to_vec()
    }

    pub fn snapshot(&self) -> Option<ClusterSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn last_decision(&self) -> Option<ScalingDecision> {
        self.decision.borrow().clone()
    }

    pub fn peers(&self) -> Vec<PeerStatus> {
        self.peers.list()
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            instance_id: self.instance_id.to_string(),
            phase: self.phase(),
            snapshot: self.snapshot(),
            workers: self.workers(),
            last_decision: self.last_decision(),
            peers: self.peers(),
        }
    }

    /// Wait until the orchestrator reaches `phase` or a later one.
    ///
    /// Returns the phase reached, or `None` if the orchestrator was dropped
    /// before getting there.
    pub async fn wait_for_phase(&self, phase: Phase) -> Option<Phase> {
        let mut rx = self.phase.clone();
        let reached = rx.wait_for(|p| *p >= phase).await.ok().map(|p| *p);
        reached
    }
}
