//! warden-autoscale: threshold-driven worker scaling.
//!
//! Compares the latest `ClusterSnapshot` against `ScalingConfig` and emits
//! one `ScalingDecision` per evaluation. A single cooldown window covers
//! both directions to prevent thrashing.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if now - last_scale_action < cooldown:          None
//! if no eligible workers:                         None
//!
//! if avg_cpu > cpu_threshold
//!    or avg_memory > memory_threshold
//!    or rpm > request_rate_threshold:             Up   (first match)
//!        unless workers >= max_workers            None (clamped)
//!
//! if avg_cpu < 30 and avg_memory < 50
//!    and rpm < 0.3 * request_rate_threshold:      Down
//!        unless workers <= min_workers            None (clamped)
//! ```
//!
//! The policy is pure: the controller calls `record_execution()` once it
//! acts on a decision.

pub mod policy;

pub use policy::ScalingPolicy;
