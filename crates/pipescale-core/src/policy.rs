//! Controller policy — the one explicit, validated configuration record.
//!
//! Loaded from TOML. Every section falls back to its defaults when omitted,
//! and `validate()` rejects out-of-range values so a bad file never replaces
//! a good policy.
//!
//! ```toml
//! [metrics]
//! poll_interval = "5s"
//! metrics_stream = "performance_metrics"
//!
//! [scaling]
//! cooldown = "3m"
//! cpu_safe_percent = 75.0
//!
//! [[pools]]
//! id = "bearing"
//! stream = "sensor_data"
//! group = "bearing_diagnosis"
//! max_consumers = 6
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;
use crate::error::{ConfigError, ConfigResult};

const WEIGHT_EPSILON: f64 = 1e-6;

/// Top-level policy file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ControllerPolicy {
    pub metrics: MetricsConfig,
    pub throughput: ThroughputConfig,
    pub health: HealthThresholds,
    pub scaling: ScalingPolicy,
    pub actuator: RetryConfig,
    pub pools: Vec<PoolConfig>,
}

/// Collector settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    #[serde(with = "serde_str")]
    pub poll_interval: Duration,
    /// Upper bound on one collection; must not exceed `poll_interval`.
    #[serde(with = "serde_str")]
    pub poll_timeout: Duration,
    /// Stream carrying the pipeline's own performance records (Tier 1).
    pub metrics_stream: String,
    /// How many of the newest performance records to examine.
    pub perf_sample_size: u32,
    /// Result streams whose recent appends indicate throughput (Tier 2).
    pub downstream_streams: Vec<String>,
    #[serde(with = "serde_str")]
    pub downstream_window: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(5),
            metrics_stream: "performance_metrics".to_string(),
            perf_sample_size: 10,
            downstream_streams: vec!["diagnosis_results".to_string()],
            downstream_window: Duration::from_secs(600),
        }
    }
}

/// Freshness decay curve for Tier 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecayCurve {
    /// `1 − age / window`.
    #[default]
    Linear,
    /// `0.5 ^ (age / half_life)`.
    Exponential { half_life_minutes: f64 },
}

/// Throughput estimator tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThroughputConfig {
    /// Tier 1 is disabled once the newest record is this old.
    #[serde(with = "serde_str")]
    pub freshness_window: Duration,
    pub min_freshness_factor: f64,
    pub decay: DecayCurve,
    pub base_multiplier: f64,
    pub activity_norm: f64,
    pub freshness_weight: f64,
    pub activity_weight: f64,
    /// Consumers idle for less than this count as active (Tier 3).
    #[serde(with = "serde_str")]
    pub activity_threshold: Duration,
    /// Upper bound on the Tier 3 estimate, msgs/sec.
    pub throughput_ceiling: f64,
    /// Per-consumer rate assumed when no consumer is active, msgs/sec.
    pub idle_consumer_rate: f64,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(30 * 60),
            min_freshness_factor: 0.1,
            decay: DecayCurve::Linear,
            base_multiplier: 6.0,
            activity_norm: 8.0,
            freshness_weight: 0.7,
            activity_weight: 0.3,
            activity_threshold: Duration::from_secs(5 * 60),
            throughput_ceiling: 100.0,
            idle_consumer_rate: 0.5,
        }
    }
}

/// Idle-time boundaries for consumer health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthThresholds {
    /// Idle below this is healthy.
    #[serde(with = "serde_str")]
    pub healthy_below: Duration,
    /// Idle at or above this is critical.
    #[serde(with = "serde_str")]
    pub critical_at: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy_below: Duration::from_secs(5 * 60),
            critical_at: Duration::from_secs(15 * 60),
        }
    }
}

/// Scaling thresholds, safety ceilings and pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingPolicy {
    pub high_load_threshold: f64,
    pub low_load_threshold: f64,
    pub cpu_safe_percent: f64,
    pub memory_safe_percent: f64,
    /// Default floor for pools that don't set their own.
    pub min_consumers: u32,
    /// Default ceiling for pools that don't set their own.
    pub max_consumers: u32,
    pub scale_step: u32,
    #[serde(with = "serde_str")]
    pub cooldown: Duration,
    /// Pending backlog at which the backlog signal saturates.
    pub backlog_norm: f64,
    /// Default per-consumer capacity, msgs/sec.
    pub capacity_per_consumer: f64,
    pub backlog_weight: f64,
    pub health_weight: f64,
    pub throughput_weight: f64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            high_load_threshold: 0.7,
            low_load_threshold: 0.25,
            cpu_safe_percent: 75.0,
            memory_safe_percent: 80.0,
            min_consumers: 1,
            max_consumers: 10,
            scale_step: 1,
            cooldown: Duration::from_secs(180),
            backlog_norm: 1000.0,
            capacity_per_consumer: 10.0,
            backlog_weight: 0.5,
            health_weight: 0.2,
            throughput_weight: 0.3,
        }
    }
}

/// Actuator retry behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "serde_str")]
    pub base_delay: Duration,
    #[serde(with = "serde_str")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// One worker pool: the consumer group serving a fault type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    pub id: String,
    pub stream: String,
    pub group: String,
    #[serde(default)]
    pub min_consumers: Option<u32>,
    #[serde(default)]
    pub max_consumers: Option<u32>,
    #[serde(default)]
    pub capacity_per_consumer: Option<f64>,
}

impl PoolConfig {
    pub fn new(id: &str, stream: &str, group: &str) -> Self {
        Self {
            id: id.to_string(),
            stream: stream.to_string(),
            group: group.to_string(),
            min_consumers: None,
            max_consumers: None,
            capacity_per_consumer: None,
        }
    }

    pub fn min(&self, policy: &ScalingPolicy) -> u32 {
        self.min_consumers.unwrap_or(policy.min_consumers)
    }

    pub fn max(&self, policy: &ScalingPolicy) -> u32 {
        self.max_consumers.unwrap_or(policy.max_consumers)
    }

    pub fn capacity(&self, policy: &ScalingPolicy) -> f64 {
        self.capacity_per_consumer
            .unwrap_or(policy.capacity_per_consumer)
    }
}

impl ControllerPolicy {
    /// Read, parse and validate a policy file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a policy from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let policy: ControllerPolicy =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Look up a pool by id.
    pub fn pool(&self, id: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.id == id)
    }

    /// Every stream whose length and head age the collector should read.
    pub fn watched_streams(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let names = self
            .pools
            .iter()
            .map(|p| &p.stream)
            .chain(std::iter::once(&self.metrics.metrics_stream))
            .chain(self.metrics.downstream_streams.iter());
        for name in names {
            if seen.insert(name.as_str()) {
                out.push(name.clone());
            }
        }
        out
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> ConfigResult<()> {
        let m = &self.metrics;
        ensure(!m.poll_interval.is_zero(), "metrics.poll_interval must be positive")?;
        ensure(!m.poll_timeout.is_zero(), "metrics.poll_timeout must be positive")?;
        ensure(
            m.poll_timeout <= m.poll_interval,
            "metrics.poll_timeout must not exceed metrics.poll_interval",
        )?;
        ensure(m.perf_sample_size > 0, "metrics.perf_sample_size must be at least 1")?;
        ensure(!m.downstream_window.is_zero(), "metrics.downstream_window must be positive")?;
        ensure(!m.metrics_stream.trim().is_empty(), "metrics.metrics_stream must be set")?;

        let t = &self.throughput;
        ensure(!t.freshness_window.is_zero(), "throughput.freshness_window must be positive")?;
        ensure(
            t.min_freshness_factor > 0.0 && t.min_freshness_factor <= 1.0,
            "throughput.min_freshness_factor must be in (0, 1]",
        )?;
        if let DecayCurve::Exponential { half_life_minutes } = t.decay {
            ensure(
                half_life_minutes > 0.0,
                "throughput.decay.half_life_minutes must be positive",
            )?;
        }
        ensure(t.base_multiplier > 0.0, "throughput.base_multiplier must be positive")?;
        ensure(t.activity_norm > 0.0, "throughput.activity_norm must be positive")?;
        ensure(
            t.freshness_weight >= 0.0 && t.activity_weight >= 0.0,
            "throughput weights must not be negative",
        )?;
        ensure(
            (t.freshness_weight + t.activity_weight - 1.0).abs() < WEIGHT_EPSILON,
            "throughput.freshness_weight + throughput.activity_weight must equal 1",
        )?;
        ensure(t.throughput_ceiling > 0.0, "throughput.throughput_ceiling must be positive")?;
        ensure(t.idle_consumer_rate >= 0.0, "throughput.idle_consumer_rate must not be negative")?;

        let h = &self.health;
        ensure(
            h.healthy_below < h.critical_at,
            "health.healthy_below must be shorter than health.critical_at",
        )?;

        let s = &self.scaling;
        ensure(
            (0.0..=1.0).contains(&s.low_load_threshold)
                && (0.0..=1.0).contains(&s.high_load_threshold),
            "scaling load thresholds must be in [0, 1]",
        )?;
        ensure(
            s.low_load_threshold < s.high_load_threshold,
            "scaling.low_load_threshold must be below scaling.high_load_threshold",
        )?;
        ensure(
            s.cpu_safe_percent > 0.0 && s.cpu_safe_percent <= 100.0,
            "scaling.cpu_safe_percent must be in (0, 100]",
        )?;
        ensure(
            s.memory_safe_percent > 0.0 && s.memory_safe_percent <= 100.0,
            "scaling.memory_safe_percent must be in (0, 100]",
        )?;
        ensure(s.scale_step >= 1, "scaling.scale_step must be at least 1")?;
        ensure(s.backlog_norm > 0.0, "scaling.backlog_norm must be positive")?;
        ensure(
            s.capacity_per_consumer > 0.0,
            "scaling.capacity_per_consumer must be positive",
        )?;
        ensure(
            s.backlog_weight >= 0.0 && s.health_weight >= 0.0 && s.throughput_weight >= 0.0,
            "scaling weights must not be negative",
        )?;
        ensure(
            (s.backlog_weight + s.health_weight + s.throughput_weight - 1.0).abs()
                < WEIGHT_EPSILON,
            "scaling backlog/health/throughput weights must sum to 1",
        )?;
        ensure(
            s.min_consumers <= s.max_consumers,
            "scaling.min_consumers must not exceed scaling.max_consumers",
        )?;

        ensure(self.actuator.max_attempts >= 1, "actuator.max_attempts must be at least 1")?;
        ensure(
            self.actuator.base_delay <= self.actuator.max_delay,
            "actuator.base_delay must not exceed actuator.max_delay",
        )?;

        let mut ids = HashSet::new();
        for pool in &self.pools {
            ensure(!pool.id.trim().is_empty(), "pool id must be set")?;
            if !ids.insert(pool.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate pool id {:?}", pool.id)));
            }
            if pool.min(s) > pool.max(s) {
                return Err(ConfigError::Invalid(format!(
                    "pool {:?}: min_consumers exceeds max_consumers",
                    pool.id
                )));
            }
            if pool.capacity(s) <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "pool {:?}: capacity_per_consumer must be positive",
                    pool.id
                )));
            }
        }

        Ok(())
    }
}

fn ensure(cond: bool, msg: &str) -> ConfigResult<()> {
    if cond {
        Ok(())
    } else {
        Err(ConfigError::Invalid(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[metrics]
poll_interval = "10s"
poll_timeout = "8s"
downstream_streams = ["diagnosis_results", "alerts"]

[throughput.decay]
type = "exponential"
half_life_minutes = 10.0

[scaling]
cooldown = "2m"
scale_step = 2

[[pools]]
id = "bearing"
stream = "sensor_data"
group = "bearing_diagnosis"
max_consumers = 6

[[pools]]
id = "motor"
stream = "sensor_data"
group = "motor_diagnosis"
"#;

    #[test]
    fn defaults_are_valid() {
        ControllerPolicy::default().validate().unwrap();
    }

    #[test]
    fn parse_sample_policy() {
        let policy = ControllerPolicy::from_toml_str(SAMPLE).unwrap();
        assert_eq!(policy.metrics.poll_interval, Duration::from_secs(10));
        assert_eq!(policy.scaling.cooldown, Duration::from_secs(120));
        assert_eq!(policy.scaling.scale_step, 2);
        assert_eq!(
            policy.throughput.decay,
            DecayCurve::Exponential { half_life_minutes: 10.0 }
        );
        assert_eq!(policy.pools.len(), 2);

        let bearing = policy.pool("bearing").unwrap();
        assert_eq!(bearing.max(&policy.scaling), 6);
        assert_eq!(bearing.min(&policy.scaling), 1);
        // Unset sections keep their defaults.
        assert_eq!(policy.health, HealthThresholds::default());
    }

    #[test]
    fn watched_streams_are_deduplicated() {
        let policy = ControllerPolicy::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            policy.watched_streams(),
            vec!["sensor_data", "performance_metrics", "diagnosis_results", "alerts"]
        );
    }

    #[test]
    fn empty_file_yields_defaults() {
        let policy = ControllerPolicy::from_toml_str("").unwrap();
        assert_eq!(policy, ControllerPolicy::default());
    }

    #[test]
    fn rejects_inverted_load_thresholds() {
        let mut policy = ControllerPolicy::default();
        policy.scaling.low_load_threshold = 0.8;
        assert!(matches!(policy.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut policy = ControllerPolicy::default();
        policy.throughput.activity_weight = 0.5;
        assert!(policy.validate().is_err());

        let mut policy = ControllerPolicy::default();
        policy.scaling.health_weight = 0.4;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_health_boundaries_out_of_order() {
        let mut policy = ControllerPolicy::default();
        policy.health.critical_at = policy.health.healthy_below;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_timeout_longer_than_interval() {
        let mut policy = ControllerPolicy::default();
        policy.metrics.poll_timeout = Duration::from_secs(30);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_pool_ids() {
        let mut policy = ControllerPolicy::default();
        policy.pools = vec![
            PoolConfig::new("bearing", "s", "g1"),
            PoolConfig::new("bearing", "s", "g2"),
        ];
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate pool id"));
    }

    #[test]
    fn rejects_pool_floor_above_ceiling() {
        let mut policy = ControllerPolicy::default();
        let mut pool = PoolConfig::new("bearing", "s", "g");
        pool.min_consumers = Some(5);
        pool.max_consumers = Some(2);
        policy.pools = vec![pool];
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_bad_duration_string() {
        let err = ControllerPolicy::from_toml_str("[scaling]\ncooldown = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        let policy = ControllerPolicy::from_toml_str(SAMPLE).unwrap();
        std::fs::write(&path, policy.to_toml_string().unwrap()).unwrap();

        let loaded = ControllerPolicy::from_file(&path).unwrap();
        assert_eq!(loaded, policy);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = ControllerPolicy::from_file(Path::new("/nonexistent/policy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
