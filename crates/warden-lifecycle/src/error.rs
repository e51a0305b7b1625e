use thiserror::Error;

use warden_core::ConfigError;
use warden_pool::PoolError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("worker pool failure: {0}")]
    Pool(#[from] PoolError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
