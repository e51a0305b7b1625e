//! warden-core: shared data model and configuration for the warden
//! worker-pool orchestrator.
//!
//! Every other warden crate depends on this one for the worker data model
//! (`WorkerHandle`, `ClusterSnapshot`, `ScalingDecision`) and for the
//! validated, immutable `OrchestratorConfig`.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{OrchestratorConfig, ScalingConfig, WorkerCommand};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use types::*;
