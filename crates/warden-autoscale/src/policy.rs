//! Scaling policy: decides whether the pool should grow or shrink.
//!
//! Evaluation is a pure function of the snapshot, the current pool size,
//! the config, and the time of the last executed action. Evaluating twice
//! with the same inputs yields the same decision.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use warden_core::{ClusterSnapshot, ScalingConfig, ScalingDecision};

pub struct ScalingPolicy {
    config: ScalingConfig,
    /// When the last decision was acted on.
    last_scale_action: Option<Instant>,
}

impl ScalingPolicy {
    pub fn new(config: ScalingConfig) -> Self {
        Self {
            config,
            last_scale_action: None,
        }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    pub fn last_scale_action(&self) -> Option<Instant> {
        self.last_scale_action
    }

    /// Time left before another action is allowed, if any.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_scale_action?;
        let elapsed = now.saturating_duration_since(last);
        self.config.cooldown_period.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Evaluate the snapshot and return a scaling decision.
    ///
    /// `worker_count` is the number of active workers in the pool, which
    /// may exceed `snapshot.worker_count` while some are still starting.
    pub fn evaluate(&self, snapshot: &ClusterSnapshot, worker_count: u32, now: Instant) -> ScalingDecision {
        if let Some(remaining) = self.cooldown_remaining(now) {
            return ScalingDecision::none(format!("cooldown active, {}s remaining", remaining.as_secs()));
        }

        if snapshot.worker_count == 0 {
            return ScalingDecision::none("no eligible workers");
        }

        let cfg = &self.config;

        if let Some(trigger) = self.scale_up_trigger(snapshot) {
            if worker_count >= cfg.max_workers {
                debug!(workers = worker_count, max = cfg.max_workers, %trigger, "scale-up clamped");
                return ScalingDecision::none(format!("{trigger}, but already at max_workers ({})", cfg.max_workers));
            }
            return ScalingDecision::up(trigger);
        }

        if self.wants_scale_down(snapshot) {
            let reason = format!(
                "low utilisation: CPU {:.1}%, memory {:.1}%, request rate {:.1}/min",
                snapshot.avg_cpu, snapshot.avg_memory, snapshot.request_rate_per_minute
            );
            if worker_count <= cfg.min_workers {
                debug!(workers = worker_count, min = cfg.min_workers, "scale-down clamped");
                return ScalingDecision::none(format!("{reason}, but already at min_workers ({})", cfg.min_workers));
            }
            return ScalingDecision::down(reason);
        }

        ScalingDecision::none("within thresholds")
    }

    /// Record that a decision was acted on. Starts the cooldown window.
    pub fn record_execution(&mut self, now: Instant) {
        self.last_scale_action = Some(now);
    }

    fn scale_up_trigger(&self, s: &ClusterSnapshot) -> Option<String> {
        let cfg = &self.config;
        if s.avg_cpu > cfg.cpu_threshold_percent {
            Some(format!(
                "CPU {:.1}% above threshold {:.1}%",
                s.avg_cpu, cfg.cpu_threshold_percent
            ))
        } else if s.avg_memory > cfg.memory_threshold_percent {
            Some(format!(
                "memory {:.1}% above threshold {:.1}%",
                s.avg_memory, cfg.memory_threshold_percent
            ))
        } else if s.request_rate_per_minute > cfg.request_rate_threshold {
            Some(format!(
                "request rate {:.1}/min above threshold {:.1}/min",
                s.request_rate_per_minute, cfg.request_rate_threshold
            ))
        } else {
            None
        }
    }

    fn wants_scale_down(&self, s: &ClusterSnapshot) -> bool {
        let cfg = &self.config;
        s.avg_cpu < cfg.scale_down_cpu_percent
            && s.avg_memory < cfg.scale_down_memory_percent
            && s.request_rate_per_minute < cfg.scale_down_request_ratio * cfg.request_rate_threshold
    }
}
