//! warden-health: health checking for worker processes.
//!
//! Workers push metrics reports; the monitor never probes them. Each
//! health tick inspects a snapshot of the pool and returns `HealthAction`
//! requests. It never touches the pool itself: the control loop applies
//! the actions through the pool, which stays the only writer.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor::check(&[WorkerHandle], now)
//!   ├── Report freshness   → MarkDead after 2 × interval of silence
//!   ├── Startup deadline   → MarkDead for workers stuck in Starting
//!   └── LoadTracker        → MarkDegraded after 2 consecutive overloaded
//!                            checks, Recovered once load drops
//! ```

pub mod checker;
pub mod monitor;

pub use checker::{Freshness, LoadTracker, freshness};
pub use monitor::{HealthAction, HealthMonitor, HealthSettings};
