//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while building an `OrchestratorConfig`.
///
/// These are the only errors that prevent the orchestrator from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("min_workers must be at least 1")]
    MinWorkersZero,

    #[error("max_workers ({max}) must be >= min_workers ({min})")]
    MaxBelowMin { min: u32, max: u32 },

    #[error("{name} must be in (0, 100], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("request_rate_threshold must be positive, got {0}")]
    NonPositiveRequestRate(f64),

    #[error("{0} must be a positive duration")]
    NonPositiveDuration(&'static str),

    #[error("worker program is not configured")]
    MissingProgram,
}
