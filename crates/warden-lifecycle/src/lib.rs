//! warden-lifecycle: the orchestrator's control loop.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::run(shutdown)
//!   Starting  ── spawn min_workers, wait for Ready or startup_timeout
//!   Running   ── select! {
//!                  shutdown         → Draining
//!                  health tick      → HealthMonitor::check → pool actions
//!                                     → floor check → publish health
//!                  scale tick       → aggregate → ScalingPolicy::evaluate
//!                                     → spawn / graceful terminate → publish
//!                  pool event       → WorkerPool::handle_event
//!               }
//!   Draining  ── WorkerPool::drain(drain_timeout)
//!   Stopped   ── Coordinator::shutdown, ShutdownReport
//! ```
//!
//! The control loop is the only writer of the pool. Everything else reads
//! through a `StatusHandle`.

pub mod error;
pub mod orchestrator;
pub mod status;

pub use error::{LifecycleError, LifecycleResult};
pub use orchestrator::{Orchestrator, ShutdownReport};
pub use status::{OrchestratorStatus, Phase, StatusHandle};
