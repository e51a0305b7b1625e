//! Worker pool error types.

use std::time::Duration;

use thiserror::Error;
use warden_core::WorkerId;

/// A worker process could not be started.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker launch timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker stdout was not captured")]
    NoStdout,

    #[error("launcher error: {0}")]
    Launcher(String),
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    #[error("spawn failed with pool below minimum ({active}/{min}): {source}")]
    BelowMinimum {
        active: u32,
        min: u32,
        #[source]
        source: SpawnError,
    },

    #[error("worker not found: {0}")]
    NotFound(WorkerId),

    #[error("worker already terminating: {0}")]
    AlreadyTerminating(WorkerId),

    #[error("pool at capacity ({0} workers)")]
    AtCapacity(u32),

    #[error("pool is draining, no new spawns")]
    Draining,
}

impl PoolError {
    /// Whether this error must stop the orchestrator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PoolError::BelowMinimum { .. })
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
