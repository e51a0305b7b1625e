//! The publish/subscribe contract of a coordination channel.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::mpsc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("coordination channel unavailable: {0}")]
    Unavailable(String),

    #[error("coordination channel closed")]
    Closed,

    #[error("invalid coordination message: {0}")]
    Decode(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// A shared publish/subscribe medium between orchestrator instances.
///
/// Delivery is at-least-once; payloads are JSON strings.
pub trait CoordinationChannel: Send + Sync + 'static {
    /// Publish a payload to every subscriber of `topic`.
    fn publish<'a>(&'a self, topic: &'a str, payload: String) -> BoxFuture<'a, ChannelResult<()>>;

    /// Subscribe to `topic`. The receiver ends when the subscription is lost.
    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, ChannelResult<mpsc::Receiver<String>>>;

    /// Keep the latest snapshot of `instance_id` readable by late joiners.
    ///
    /// Channels without a key-value side may ignore this.
    fn record_snapshot<'a>(
        &'a self,
        _topic: &'a str,
        _instance_id: &'a str,
        _payload: String,
    ) -> BoxFuture<'a, ChannelResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Release the channel. Subscriptions end.
    fn close(&self) -> BoxFuture<'_, ()>;
}
