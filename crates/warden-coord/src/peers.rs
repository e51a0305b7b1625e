//! Peer view: last message seen from each other instance.
//!
//! Peers that have not published for `stale_after` are reported as stale
//! but kept, so operators can see which instance went quiet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::message::ClusterMessage;

struct PeerEntry {
    last: ClusterMessage,
    seen_at: Instant,
}

/// Status of one peer instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerStatus {
    pub instance_id: String,
    pub worker_count: u32,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    /// Timestamp carried by the peer's last message, unix millis.
    pub last_timestamp: u64,
    pub stale: bool,
}

pub struct PeerView {
    peers: HashMap<String, PeerEntry>,
    stale_after: Duration,
}

impl PeerView {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            stale_after,
        }
    }

    /// Record a message from a peer.
    pub fn observe(&mut self, message: ClusterMessage, now: Instant) {
        if !self.peers.contains_key(&message.instance_id) {
            info!(peer = %message.instance_id, "new peer instance seen");
        }
        self.peers.insert(
            message.instance_id.clone(),
            PeerEntry {
                last: message,
                seen_at: now,
            },
        );
    }

    /// All known peers, sorted by instance id.
    pub fn list(&self, now: Instant) -> Vec<PeerStatus> {
        let mut out: Vec<PeerStatus> = self
            .peers
            .values()
            .map(|e| PeerStatus {
                instance_id: e.last.instance_id.clone(),
                worker_count: e.last.worker_count,
                avg_cpu: e.last.avg_cpu,
                avg_memory: e.last.avg_memory,
                last_timestamp: e.last.timestamp,
                stale: now.saturating_duration_since(e.seen_at) > self.stale_after,
            })
            .collect();
        out.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        out
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Shared read access to a `PeerView`.
#[derive(Clone)]
pub struct PeersHandle {
    view: Arc<Mutex<PeerView>>,
}

impl PeersHandle {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            view: Arc::new(Mutex::new(PeerView::new(stale_after))),
        }
    }

    pub fn observe(&self, message: ClusterMessage, now: Instant) {
        self.lock().observe(message, now);
    }

    pub fn list(&self) -> Vec<PeerStatus> {
        self.lock().list(Instant::now())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PeerView> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }
}
