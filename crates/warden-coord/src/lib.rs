//! warden-coord: cross-instance visibility of pool state.
//!
//! Every orchestrator instance publishes its health snapshots and executed
//! scaling decisions to a shared topic and listens for its peers. Peer
//! messages are informational only; they never feed the scaling policy.
//!
//! # Architecture
//!
//! ```text
//! control loop ──offer()──► Outbox (bounded, drop-oldest)
//!                              │
//!                     publisher task ──publish()──► CoordinationChannel
//!                     (backoff 1s → 30s)                  │
//!                                                         ▼
//!                     subscriber task ◄──subscribe()── topic
//!                              │
//!                              ▼
//!                          PeerView  ──► status surface
//! ```

pub mod channel;
pub mod coordinator;
pub mod memory;
pub mod message;
pub mod peers;
#[cfg(feature = "redis")]
pub mod redis_channel;

pub use channel::{BoxFuture, ChannelError, ChannelResult, CoordinationChannel};
pub use coordinator::{Coordinator, CoordinatorSettings};
pub use memory::{MemoryBus, MemoryChannel};
pub use message::{ClusterEvent, ClusterMessage};
pub use peers::{PeerStatus, PeerView, PeersHandle};
#[cfg(feature = "redis")]
pub use redis_channel::RedisChannel;
