//! In-process coordination channel.
//!
//! A `MemoryBus` is a set of broadcast topics shared by every
//! `MemoryChannel` created from it, so several orchestrators in one process
//! see each other. Used for tests and single-host deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use crate::channel::{BoxFuture, ChannelError, ChannelResult, CoordinationChannel};

const TOPIC_CAPACITY: usize = 256;
const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
    snapshots: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

/// Shared in-memory medium.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new channel endpoint on this bus.
    pub fn channel(&self) -> MemoryChannel {
        let (closed, _) = watch::channel(false);
        MemoryChannel {
            bus: self.clone(),
            closed,
        }
    }

    /// Simulate an outage: publishes and subscribes fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Latest recorded snapshot payload for an instance.
    pub fn snapshot(&self, topic: &str, instance_id: &str) -> Option<String> {
        let snapshots = self.inner.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.get(&snapshot_key(topic, instance_id)).cloned()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    fn check_available(&self) -> ChannelResult<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            Err(ChannelError::Unavailable("memory bus offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn snapshot_key(topic: &str, instance_id: &str) -> String {
    format!("{topic}:instance:{instance_id}")
}

/// One endpoint on a `MemoryBus`.
pub struct MemoryChannel {
    bus: MemoryBus,
    closed: watch::Sender<bool>,
}

impl MemoryChannel {
    fn check_open(&self) -> ChannelResult<()> {
        if *self.closed.borrow() {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }
}

impl CoordinationChannel for MemoryChannel {
    fn publish<'a>(&'a self, topic: &'a str, payload: String) -> BoxFuture<'a, ChannelResult<()>> {
        Box::pin(async move {
            self.check_open()?;
            self.bus.check_available()?;
            // No subscribers is not an error.
            let _ = self.bus.sender(topic).send(payload);
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, ChannelResult<mpsc::Receiver<String>>> {
        Box::pin(async move {
            self.check_open()?;
            self.bus.check_available()?;

            let mut source = self.bus.sender(topic).subscribe();
            let mut closed = self.closed.subscribe();
            let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
            let topic = topic.to_string();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = source.recv() => match msg {
                            Ok(payload) => {
                                if tx.send(payload).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(%topic, skipped, "coordination subscriber lagging, messages skipped");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        _ = closed.changed() => break,
                    }
                }
                debug!(%topic, "memory subscription ended");
            });

            Ok(rx)
        })
    }

    fn record_snapshot<'a>(
        &'a self,
        topic: &'a str,
        instance_id: &'a str,
        payload: String,
    ) -> BoxFuture<'a, ChannelResult<()>> {
        Box::pin(async move {
            self.check_open()?;
            self.bus.check_available()?;
            let mut snapshots = self.bus.inner.snapshots.lock().unwrap_or_else(|e| e.into_inner());
            snapshots.insert(snapshot_key(topic, instance_id), payload);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.send_replace(true);
        })
    }
}
