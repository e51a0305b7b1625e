//! Coordinator: background publisher and subscriber for one instance.
//!
//! The control loop hands messages to `offer()`, which never waits: the
//! message lands in a bounded outbox that drops its oldest entry when
//! full. A publisher task drains the outbox, retrying channel failures
//! with exponential backoff. A subscriber task feeds peer messages into
//! the `PeerView`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use warden_core::OrchestratorConfig;

use crate::channel::CoordinationChannel;
use crate::message::ClusterMessage;
use crate::peers::{PeerStatus, PeersHandle};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Upper bound on the final flush during shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub instance_id: String,
    pub topic: String,
    /// Outbox capacity.
    pub buffer: usize,
    /// Peers silent for longer than this are reported stale.
    pub peer_stale_after: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            instance_id: config.instance_id.clone(),
            topic: config.coordination_topic.clone(),
            buffer: 64,
            // Peers publish every health tick.
            peer_stale_after: config.scaling.health_check_interval * 3,
        }
    }
}

/// Bounded drop-oldest queue between the control loop and the publisher.
struct Outbox {
    queue: Mutex<VecDeque<ClusterMessage>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, message: ClusterMessage) {
        {
            let mut queue = self.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, "coordination outbox full, dropped oldest message");
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<ClusterMessage> {
        self.lock().pop_front()
    }

    async fn next(&self) -> ClusterMessage {
        loop {
            if let Some(message) = self.pop() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ClusterMessage>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Coordinator {
    instance_id: String,
    channel: Arc<dyn CoordinationChannel>,
    outbox: Arc<Outbox>,
    peers: PeersHandle,
    shutdown_tx: watch::Sender<bool>,
    publisher: JoinHandle<()>,
    subscriber: JoinHandle<()>,
}

impl Coordinator {
    /// Start the publisher and subscriber tasks.
    pub fn start(channel: Arc<dyn CoordinationChannel>, settings: CoordinatorSettings) -> Self {
        let outbox = Arc::new(Outbox::new(settings.buffer));
        let peers = PeersHandle::new(settings.peer_stale_after);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let publisher = tokio::spawn(publish_loop(
            channel.clone(),
            settings.clone(),
            outbox.clone(),
            shutdown_rx.clone(),
        ));
        let subscriber = tokio::spawn(subscribe_loop(
            channel.clone(),
            settings.clone(),
            peers.clone(),
            shutdown_rx,
        ));

        info!(instance = %settings.instance_id, topic = %settings.topic, "coordinator started");
        Self {
            instance_id: settings.instance_id,
            channel,
            outbox,
            peers,
            shutdown_tx,
            publisher,
            subscriber,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Queue a message for publishing. Never blocks.
    pub fn offer(&self, message: ClusterMessage) {
        self.outbox.push(message);
    }

    pub fn peers(&self) -> Vec<PeerStatus> {
        self.peers.list()
    }

    pub fn peers_handle(&self) -> PeersHandle {
        self.peers.clone()
    }

    /// Messages dropped because the outbox was full.
    pub fn dropped(&self) -> u64 {
        self.outbox.dropped.load(Ordering::Relaxed)
    }

    /// Messages waiting to be published.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Flush what can be flushed quickly, then stop both tasks and close
    /// the channel.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);

        let mut publisher = self.publisher;
        if tokio::time::timeout(FLUSH_TIMEOUT * 2, &mut publisher).await.is_err() {
            warn!("coordination publisher did not stop in time, aborting");
            publisher.abort();
        }
        self.subscriber.abort();
        self.channel.close().await;
        info!(instance = %self.instance_id, "coordinator stopped");
    }
}

async fn publish_loop(
    channel: Arc<dyn CoordinationChannel>,
    settings: CoordinatorSettings,
    outbox: Arc<Outbox>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let message = tokio::select! {
            message = outbox.next() => message,
            _ = shutdown.changed() => break,
        };

        let payload = match message.to_json() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode coordination message");
                continue;
            }
        };

        loop {
            match publish_once(channel.as_ref(), &settings, &payload).await {
                Ok(()) => {
                    backoff = INITIAL_BACKOFF;
                    break;
                }
                Err(e) => {
                    warn!(
                        topic = %settings.topic,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "coordination publish failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => return,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    // Best-effort flush: one attempt per queued message.
    let flush = async {
        while let Some(message) = outbox.pop() {
            let Ok(payload) = message.to_json() else { continue };
            if let Err(e) = publish_once(channel.as_ref(), &settings, &payload).await {
                debug!(error = %e, "final coordination flush failed");
                break;
            }
        }
    };
    let _ = tokio::time::timeout(FLUSH_TIMEOUT, flush).await;
    debug!("coordination publisher stopped");
}

async fn publish_once(
    channel: &dyn CoordinationChannel,
    settings: &CoordinatorSettings,
    payload: &str,
) -> crate::ChannelResult<()> {
    channel.publish(&settings.topic, payload.to_string()).await?;
    if let Err(e) = channel
        .record_snapshot(&settings.topic, &settings.instance_id, payload.to_string())
        .await
    {
        debug!(error = %e, "failed to record coordination snapshot");
    }
    Ok(())
}

async fn subscribe_loop(
    channel: Arc<dyn CoordinationChannel>,
    settings: CoordinatorSettings,
    peers: PeersHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match channel.subscribe(&settings.topic).await {
            Ok(mut rx) => {
                debug!(topic = %settings.topic, "subscribed to coordination topic");
                backoff = INITIAL_BACKOFF;
                loop {
                    let payload = tokio::select! {
                        p = rx.recv() => p,
                        _ = shutdown.changed() => return,
                    };
                    let Some(payload) = payload else { break };
                    handle_payload(&settings, &peers, &payload);
                }
                warn!(topic = %settings.topic, "coordination subscription lost");
            }
            Err(e) => {
                warn!(
                    topic = %settings.topic,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "coordination subscribe failed"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn handle_payload(settings: &CoordinatorSettings, peers: &PeersHandle, payload: &str) {
    let message = match ClusterMessage::from_json(payload) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "ignoring malformed coordination message");
            return;
        }
    };
    if message.instance_id == settings.instance_id {
        return;
    }
    info!(
        peer = %message.instance_id,
        workers = message.worker_count,
        avg_cpu = message.avg_cpu,
        avg_memory = message.avg_memory,
        event = ?message.event,
        "peer update"
    );
    peers.observe(message, Instant::now());
}
