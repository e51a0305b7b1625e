//! Redis-backed coordination channel.
//!
//! Feature-gated behind `redis`. Publishes with PUBLISH over a
//! `ConnectionManager` (reconnects on its own), subscribes through a
//! dedicated pub/sub connection per subscription, and keeps the latest
//! snapshot of each instance under a `SETEX` key so late joiners can read
//! it.

use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{BoxFuture, ChannelResult, CoordinationChannel};

const SUBSCRIBER_BUFFER: usize = 64;

pub struct RedisChannel {
    client: redis::Client,
    connection: ConnectionManager,
    /// Lifetime of the per-instance snapshot key.
    snapshot_ttl: Duration,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisChannel {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str, snapshot_ttl: Duration) -> ChannelResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client.clone()).await?;
        debug!(url = %redact_url(url), "redis coordination channel connected");
        Ok(Self {
            client,
            connection,
            snapshot_ttl,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|h| !h.is_finished());
        subs.push(handle);
    }
}

impl CoordinationChannel for RedisChannel {
    fn publish<'a>(&'a self, topic: &'a str, payload: String) -> BoxFuture<'a, ChannelResult<()>> {
        Box::pin(async move {
            let mut conn = self.connection.clone();
            let receivers: i64 = redis::cmd("PUBLISH")
                .arg(topic)
                .arg(payload)
                .query_async(&mut conn)
                .await?;
            debug!(%topic, receivers, "published coordination message");
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, ChannelResult<mpsc::Receiver<String>>> {
        Box::pin(async move {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(topic).await?;

            let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
            let topic = topic.to_string();
            let handle = tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                while let Some(msg) = messages.next().await {
                    match msg.get_payload::<String>() {
                        Ok(payload) => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(%topic, error = %e, "non-text coordination payload"),
                    }
                }
                debug!(%topic, "redis subscription ended");
            });
            self.track(handle);

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
            let mut conn = self.connection.clone();
            let key = format!("{topic}:instance:{instance_id}");
            redis::cmd("SETEX")
                .arg(&key)
                .arg(self.snapshot_ttl.as_secs().max(1))
                .arg(payload)
                .query_async::<()>(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let subs: Vec<JoinHandle<()>> = {
                let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
                subs.drain(..).collect()
            };
            for handle in subs {
                handle.abort();
            }
        })
    }
}

/// Hide credentials in a redis URL for logging.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***{}", &url[..scheme], &url[at..]),
        _ => url.to_string(),
    }
}
