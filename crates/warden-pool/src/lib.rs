//! warden-pool: worker pool management.
//!
//! The `WorkerPool` is the single writer of the worker collection. It
//! launches worker processes through a `Launcher`, hands each process to a
//! supervisor task, and applies the events those tasks send back.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool (single writer)
//!   ├── Launcher ──────────────► WorkerProcess + report stream
//!   ├── Per-worker supervisor task
//!   │   ├── forwards MetricsReport  ─┐
//!   │   ├── executes StopCommand     │ PoolEvent
//!   │   └── observes process exit  ──┘
//!   └── watch::Sender<Arc<[WorkerHandle]>> (copy-on-read snapshots)
//! ```
//!
//! A worker leaves the collection only after its supervisor has observed
//! the OS process exit.

pub mod error;
pub mod launcher;
pub mod pool;
mod supervisor;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use error::{PoolError, PoolResult, SpawnError};
pub use launcher::{BoxFuture, ExitOutcome, Launched, Launcher, ProcessLauncher, WorkerProcess};
pub use pool::{DrainReport, PoolEvent, PoolSettings, PoolUpdate, WorkerPool};
