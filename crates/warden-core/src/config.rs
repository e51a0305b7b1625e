//! warden.toml configuration parser.
//!
//! Configuration is read from an optional TOML file and then overridden by
//! `WARDEN_*` environment variables. The result is validated once and is
//! immutable for the lifetime of the orchestrator.
//!
//! ```toml
//! instance_id = "edge-1"
//! drain_timeout = "30s"
//!
//! [scaling]
//! min_workers = 2
//! max_workers = 6
//! cpu_threshold_percent = 80
//! cooldown_period = "5m"
//!
//! [worker]
//! program = "/usr/local/bin/api-server"
//! args = ["--port", "0"]
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::duration::{self, parse_duration};
use crate::error::{ConfigError, ConfigResult};

/// Thresholds and timings for the scaling policy and health checks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_workers: u32,
    pub max_workers: u32,
    pub cpu_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    /// Requests per minute across the cluster that triggers a scale-up.
    pub request_rate_threshold: f64,
    #[serde(deserialize_with = "duration::deserialize")]
    pub cooldown_period: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub health_check_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub scale_evaluation_interval: Duration,
    /// Scale-down requires average CPU below this.
    pub scale_down_cpu_percent: f64,
    /// Scale-down requires average memory below this.
    pub scale_down_memory_percent: f64,
    /// Scale-down requires the request rate below this fraction of
    /// `request_rate_threshold`.
    pub scale_down_request_ratio: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            cpu_threshold_percent: 80.0,
            memory_threshold_percent: 85.0,
            request_rate_threshold: 1000.0,
            cooldown_period: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(10),
            scale_evaluation_interval: Duration::from_secs(30),
            scale_down_cpu_percent: 30.0,
            scale_down_memory_percent: 50.0,
            scale_down_request_ratio: 0.3,
        }
    }
}

/// The program each worker runs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables passed to every worker.
    pub env: HashMap<String, String>,
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Identity of this orchestrator on the coordination channel.
    pub instance_id: String,
    pub coordination_topic: String,
    /// Coordination store URL (e.g. `redis://127.0.0.1/`). In-process
    /// channel when unset.
    pub coordination_url: Option<String>,
    #[serde(deserialize_with = "duration::deserialize")]
    pub drain_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub startup_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub spawn_timeout: Duration,
    /// CPU or memory percentage above which a worker counts as overloaded.
    pub high_load_percent: f64,
    pub scaling: ScalingConfig,
    pub worker: WorkerCommand,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            coordination_topic: "warden:cluster".to_string(),
            coordination_url: None,
            drain_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(60),
            spawn_timeout: Duration::from_secs(10),
            high_load_percent: 95.0,
            scaling: ScalingConfig::default(),
            worker: WorkerCommand::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Build the final configuration: file (if any), then process
    /// environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WARDEN_*` overrides. Unknown keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("WARDEN_") else {
                continue;
            };
            match name {
                "INSTANCE_ID" => self.instance_id = value,
                "COORDINATION_TOPIC" => self.coordination_topic = value,
                "COORDINATION_URL" => self.coordination_url = Some(value),
                "DRAIN_TIMEOUT" => self.drain_timeout = env_duration(&key, &value)?,
                "STARTUP_TIMEOUT" => self.startup_timeout = env_duration(&key, &value)?,
                "SPAWN_TIMEOUT" => self.spawn_timeout = env_duration(&key, &value)?,
                "HIGH_LOAD_PERCENT" => self.high_load_percent = env_parse(&key, &value)?,
                "MIN_WORKERS" => self.scaling.min_workers = env_parse(&key, &value)?,
                "MAX_WORKERS" => self.scaling.max_workers = env_parse(&key, &value)?,
                "CPU_THRESHOLD" => self.scaling.cpu_threshold_percent = env_parse(&key, &value)?,
                "MEMORY_THRESHOLD" => {
                    self.scaling.memory_threshold_percent = env_parse(&key, &value)?
                }
                "REQUEST_RATE_THRESHOLD" => {
                    self.scaling.request_rate_threshold = env_parse(&key, &value)?
                }
                "COOLDOWN" => self.scaling.cooldown_period = env_duration(&key, &value)?,
                "HEALTH_CHECK_INTERVAL" => {
                    self.scaling.health_check_interval = env_duration(&key, &value)?
                }
                "SCALE_EVALUATION_INTERVAL" => {
                    self.scaling.scale_evaluation_interval = env_duration(&key, &value)?
                }
                "WORKER_PROGRAM" => self.worker.program = value,
                "WORKER_ARGS" => {
                    self.worker.args = value.split_whitespace().map(str::to_string).collect()
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Check every invariant of the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let s = &self.scaling;
        if s.min_workers < 1 {
            return Err(ConfigError::MinWorkersZero);
        }
        if s.max_workers < s.min_workers {
            return Err(ConfigError::MaxBelowMin {
                min: s.min_workers,
                max: s.max_workers,
            });
        }

        for (name, value) in [
            ("cpu_threshold_percent", s.cpu_threshold_percent),
            ("memory_threshold_percent", s.memory_threshold_percent),
            ("scale_down_cpu_percent", s.scale_down_cpu_percent),
            ("scale_down_memory_percent", s.scale_down_memory_percent),
            ("high_load_percent", self.high_load_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if !(s.request_rate_threshold > 0.0) {
            return Err(ConfigError::NonPositiveRequestRate(s.request_rate_threshold));
        }
        if !(s.scale_down_request_ratio > 0.0 && s.scale_down_request_ratio <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "scale_down_request_ratio",
                value: s.scale_down_request_ratio,
            });
        }

        for (name, value) in [
            ("cooldown_period", s.cooldown_period),
            ("health_check_interval", s.health_check_interval),
            ("scale_evaluation_interval", s.scale_evaluation_interval),
            ("drain_timeout", self.drain_timeout),
            ("startup_timeout", self.startup_timeout),
            ("spawn_timeout", self.spawn_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::NonPositiveDuration(name));
            }
        }
        Ok(())
    }
}

fn default_instance_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "warden".to_string());
    format!("{host}-{}", std::process::id())
}

fn env_parse<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn env_duration(key: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_minimal() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
instance_id = "edge-1"

[scaling]
min_workers = 2
max_workers = 6
cooldown_period = "300s"

[worker]
program = "/bin/api"
"#,
        )
        .unwrap();
        assert_eq!(config.instance_id, "edge-1");
        assert_eq!(config.scaling.max_workers, 6);
        assert_eq!(config.scaling.cooldown_period, Duration::from_secs(300));
        // Unset keys keep their defaults.
        assert_eq!(config.scaling.cpu_threshold_percent, 80.0);
        assert_eq!(config.worker.program, "/bin/api");
    }

    #[test]
    fn parse_integer_seconds() {
        let config = OrchestratorConfig::from_toml_str("drain_timeout = 12").unwrap();
        assert_eq!(config.drain_timeout, Duration::from_secs(12));
    }

    #[test]
    fn parse_rejects_bad_duration() {
        let err = OrchestratorConfig::from_toml_str("drain_timeout = \"later\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "[scaling]\nmin_workers = 3\nmax_workers = 3\n").unwrap();

        let config = OrchestratorConfig::from_file(&path).unwrap();
        assert_eq!(config.scaling.min_workers, 3);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = OrchestratorConfig::default();
        config
            .apply_env(vars(&[
                ("WARDEN_MIN_WORKERS", "3"),
                ("WARDEN_COOLDOWN", "2m"),
                ("WARDEN_WORKER_ARGS", "--port 0 --quiet"),
                ("HOME", "/root"),
                ("WARDEN_UNKNOWN", "ignored"),
            ]))
            .unwrap();
        assert_eq!(config.scaling.min_workers, 3);
        assert_eq!(config.scaling.cooldown_period, Duration::from_secs(120));
        assert_eq!(config.worker.args, vec!["--port", "0", "--quiet"]);
    }

    #[test]
    fn env_rejects_unparseable_value() {
        let mut config = OrchestratorConfig::default();
        let err = config
            .apply_env(vars(&[("WARDEN_MAX_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn validate_rejects_zero_min() {
        let mut config = OrchestratorConfig::default();
        config.scaling.min_workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::MinWorkersZero)));
    }

    #[test]
    fn validate_rejects_max_below_min() {
        let mut config = OrchestratorConfig::default();
        config.scaling.min_workers = 4;
        config.scaling.max_workers = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MaxBelowMin { min: 4, max: 2 })
        ));
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = OrchestratorConfig::default();
        config.drain_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveDuration("drain_timeout"))
        ));
    }

    #[test]
    fn validate_rejects_threshold_out_of_range() {
        let mut config = OrchestratorConfig::default();
        config.scaling.cpu_threshold_percent = 140.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange { name: "cpu_threshold_percent", .. })
        ));
    }
}
