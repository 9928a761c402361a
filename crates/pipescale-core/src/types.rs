//! Domain types shared across the controller.
//!
//! Durations and ages are carried as integer milliseconds (`*_ms`), wall
//! clock instants as unix epoch milliseconds (`*_at_ms`). All types are
//! serializable so snapshots, decisions and status reports can be exported
//! or persisted as JSON.

use serde::{Deserialize, Serialize};

/// Identifier of a worker pool (one consumer group per fault type).
pub type PoolId = String;

// ── Telemetry snapshot ─────────────────────────────────────────────

/// Length and head age of one stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamStats {
    pub name: String,
    /// Number of entries currently in the stream.
    pub length: u64,
    /// Age of the newest entry. `None` for an empty stream.
    pub latest_entry_age_ms: Option<u64>,
}

/// Pending-entry count of one consumer group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupStats {
    pub stream: String,
    pub group_name: String,
    /// Delivered but unacknowledged entries.
    pub pending_count: u64,
}

/// Idle time and pending entries of one consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerStats {
    pub stream: String,
    pub group: String,
    pub consumer_id: String,
    /// Time since the consumer last acknowledged an entry.
    pub idle_ms: u64,
    pub pending_count: u64,
}

/// Host resource utilisation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HostStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Most-recent-N sample of the performance metrics stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PerfSample {
    /// Number of records examined (at most the configured sample size).
    pub record_count: u64,
    /// Age of the newest record in the sample.
    pub newest_age_ms: u64,
}

/// Entries appended to a downstream result stream within a window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamActivity {
    pub stream: String,
    pub entries_in_window: u64,
    pub window_ms: u64,
}

/// A single telemetry item that could not be read during a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryFault {
    /// What was being read, e.g. `stream:sensor-raw` or `host`.
    pub source: String,
    pub message: String,
}

/// Point-in-time view of the pipeline, built once per poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsSnapshot {
    /// Unix timestamp (milliseconds) when collection finished.
    pub taken_at_ms: u64,
    pub streams: Vec<StreamStats>,
    pub groups: Vec<GroupStats>,
    pub consumers: Vec<ConsumerStats>,
    pub host: Option<HostStats>,
    pub perf_sample: Option<PerfSample>,
    pub downstream: Vec<StreamActivity>,
    pub faults: Vec<TelemetryFault>,
}

impl MetricsSnapshot {
    /// Look up a stream by name.
    pub fn stream(&self, name: &str) -> Option<&StreamStats> {
        self.streams.iter().find(|s| s.name == name)
    }

    /// Look up a consumer group.
    pub fn group(&self, stream: &str, group: &str) -> Option<&GroupStats> {
        self.groups
            .iter()
            .find(|g| g.stream == stream && g.group_name == group)
    }

    /// Consumers belonging to one group.
    pub fn consumers_of<'a>(
        &'a self,
        stream: &'a str,
        group: &'a str,
    ) -> impl Iterator<Item = &'a ConsumerStats> + 'a {
        self.consumers
            .iter()
            .filter(move |c| c.stream == stream && c.group == group)
    }

    /// Milliseconds elapsed between `taken_at_ms` and `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.taken_at_ms)
    }
}

// ── Throughput ─────────────────────────────────────────────────────

/// Which estimation tier produced a throughput value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    /// Tier 1: freshness-weighted performance metrics stream.
    MetricsStream,
    /// Tier 2: downstream result stream activity.
    DownstreamActivity,
    /// Tier 3: consumer activity heuristic.
    ConsumerActivity,
}

impl EstimationMethod {
    /// Numeric tier (1, 2 or 3).
    pub fn tier(self) -> u8 {
        match self {
            Self::MetricsStream => 1,
            Self::DownstreamActivity => 2,
            Self::ConsumerActivity => 3,
        }
    }
}

/// System throughput for one cycle. Replaced each cycle, never patched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThroughputEstimate {
    pub value_msgs_per_sec: f64,
    pub method_used: EstimationMethod,
    /// Trust in the value (0.0–1.0).
    pub confidence: f64,
    /// Tier 3 found no active consumer and fell back to a per-consumer constant.
    pub low_confidence_fallback: bool,
}

// ── Health ─────────────────────────────────────────────────────────

/// Health bucket derived from consumer idle time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Warning,
    Critical,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Classified health of a single consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerHealth {
    pub consumer_id: String,
    pub group: String,
    pub state: HealthState,
    /// The idle duration that produced `state`.
    pub idle_ms: u64,
    pub pending_count: u64,
}

/// Aggregate health of one worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolHealth {
    pub pool_id: PoolId,
    pub total: u32,
    pub healthy: u32,
    pub warning: u32,
    pub critical: u32,
    pub pending_backlog: u64,
    /// healthy / total, 0.0 for an empty pool.
    pub healthy_ratio: f64,
}

/// Cluster-wide health, the unweighted mean over pools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClusterHealth {
    pub pools: Vec<PoolHealth>,
    /// 100 × mean(pool healthy_ratio).
    pub health_percent: f64,
}

// ── Scaling ────────────────────────────────────────────────────────

/// Action requested from the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    Maintain,
}

impl ScaleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::Maintain => "maintain",
        }
    }
}

/// Per-pool state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    /// Inside the cooldown window; decisions are forced to maintain.
    Cooling,
    /// Free to evaluate load.
    #[default]
    Evaluating,
    /// A scale decision was committed and is being actuated.
    Acting,
}

/// A scaling decision for one pool. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub pool_id: PoolId,
    pub action: ScaleAction,
    pub current_count: u32,
    pub target_count: u32,
    /// Composite load signal (0.0–1.0) when it was computed.
    pub load_score: Option<f64>,
    pub confidence: f64,
    /// Literal list of triggering conditions.
    pub reasoning: Vec<String>,
    pub decided_at_ms: u64,
}

impl ScalingDecision {
    /// Whether the actuator needs to do anything.
    pub fn is_actionable(&self) -> bool {
        self.action != ScaleAction::Maintain && self.target_count != self.current_count
    }
}

/// Mutable per-pool scaling bookkeeping, owned by the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingState {
    pub pool_id: PoolId,
    /// Consumer count confirmed by the actuator.
    pub current_count: u32,
    /// When the last scale decision was committed.
    pub last_scale_at_ms: Option<u64>,
    pub last_decision: Option<ScalingDecision>,
    pub phase: PoolPhase,
    /// An actuation for this pool has not completed yet.
    pub in_flight: bool,
    /// Pending backlog seen on the previous evaluation.
    pub last_backlog: Option<u64>,
}

impl ScalingState {
    pub fn new(pool_id: &str, current_count: u32) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            current_count,
            last_scale_at_ms: None,
            last_decision: None,
            phase: PoolPhase::Evaluating,
            in_flight: false,
            last_backlog: None,
        }
    }
}

/// What the actuator reported after applying a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationOutcome {
    pub applied: bool,
    pub new_count: u32,
}

// ── Status surface ─────────────────────────────────────────────────

/// Once-per-cycle export for dashboards and API layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatusReport {
    pub generated_at_ms: u64,
    pub throughput: Option<ThroughputEstimate>,
    pub cluster: ClusterHealth,
    /// Last decision per pool.
    pub decisions: Vec<ScalingDecision>,
    /// The snapshot behind this report is stale.
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer(group: &str, id: &str) -> ConsumerStats {
        ConsumerStats {
            stream: "faults".to_string(),
            group: group.to_string(),
            consumer_id: id.to_string(),
            idle_ms: 0,
            pending_count: 0,
        }
    }

    #[test]
    fn consumers_of_filters_by_group() {
        let snap = MetricsSnapshot {
            consumers: vec![
                consumer("bearing", "a"),
                consumer("motor", "b"),
                consumer("bearing", "c"),
            ],
            ..Default::default()
        };
        let ids: Vec<_> = snap
            .consumers_of("faults", "bearing")
            .map(|c| c.consumer_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn tiers_are_numbered() {
        assert_eq!(EstimationMethod::MetricsStream.tier(), 1);
        assert_eq!(EstimationMethod::DownstreamActivity.tier(), 2);
        assert_eq!(EstimationMethod::ConsumerActivity.tier(), 3);
    }

    #[test]
    fn maintain_is_not_actionable() {
        let decision = ScalingDecision {
            pool_id: "bearing".to_string(),
            action: ScaleAction::Maintain,
            current_count: 2,
            target_count: 2,
            load_score: None,
            confidence: 1.0,
            reasoning: vec![],
            decided_at_ms: 0,
        };
        assert!(!decision.is_actionable());
        let up = ScalingDecision {
            action: ScaleAction::ScaleUp,
            target_count: 3,
            ..decision
        };
        assert!(up.is_actionable());
    }

    #[test]
    fn snapshot_age_saturates() {
        let snap = MetricsSnapshot {
            taken_at_ms: 10_000,
            ..Default::default()
        };
        assert_eq!(snap.age_ms(12_500), 2_500);
        assert_eq!(snap.age_ms(5_000), 0);
    }

    #[test]
    fn decision_serializes_action_snake_case() {
        let json = serde_json::to_string(&ScaleAction::ScaleDown).unwrap();
        assert_eq!(json, "\"scale_down\"");
    }
}
