//! Coordination channel selection.

use std::sync::Arc;

use tracing::info;

use warden_coord::{CoordinationChannel, MemoryBus};
use warden_core::OrchestratorConfig;

/// Pick the channel for `config.coordination_url`.
///
/// With no URL the orchestrator gets a private in-process bus and no peers.
pub async fn open_channel(config: &OrchestratorConfig) -> anyhow::Result<Arc<dyn CoordinationChannel>> {
    match config.coordination_url.as_deref() {
        None => {
            info!("no coordination url configured, using in-process channel");
            Ok(Arc::new(MemoryBus::new().channel()))
        }
        Some(url) => connect(url, config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect(url: &str, config: &OrchestratorConfig) -> anyhow::Result<Arc<dyn CoordinationChannel>> {
    use anyhow::Context;

    // Snapshots outlive one missed publish.
    let ttl = config.scaling.health_check_interval * 3;
    let channel = warden_coord::RedisChannel::connect(url, ttl)
        .await
        .context("failed to connect coordination channel")?;
    info!(topic = %config.coordination_topic, "redis coordination channel ready");
    Ok(Arc::new(channel))
}

#[cfg(not(feature = "redis"))]
async fn connect(url: &str, _config: &OrchestratorConfig) -> anyhow::Result<Arc<dyn CoordinationChannel>> {
    let scheme = url.split("://").next().unwrap_or(url);
    tracing::warn!(%scheme, "coordination url set but wardend was built without channel support, peers disabled");
    Ok(Arc::new(MemoryBus::new().channel()))
}
