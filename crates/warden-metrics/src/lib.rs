//! warden-metrics: cluster-level view of worker metrics.
//!
//! Folds the per-worker reports held by the pool into a `ClusterSnapshot`
//! for the scaling policy, and renders Prometheus text for the status
//! surface.
//!
//! # Architecture
//!
//! ```text
//! MetricsAggregator
//!   ├── observe() → aggregate() against the previous snapshot
//!   └── latest()  → last snapshot, for status and coordination
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod aggregator;
pub mod prometheus;

pub use aggregator::{MetricsAggregator, aggregate};
pub use prometheus::render_prometheus;
