//! Three-tier throughput estimator.
//!
//! A pure function of (snapshot, staleness, config): estimating the same
//! snapshot twice yields the identical estimate.

use tracing::debug;

use pipescale_core::{EstimationMethod, MetricsSnapshot, ThroughputConfig, ThroughputEstimate};

use crate::decay::freshness_factor;

const MS_PER_MINUTE: f64 = 60_000.0;

const TIER1_CONFIDENCE_BASE: f64 = 0.7;
const TIER1_CONFIDENCE_FRESHNESS: f64 = 0.2;
const TIER2_CONFIDENCE: f64 = 0.6;
const TIER3_CONFIDENCE: f64 = 0.4;
const TIER3_FALLBACK_CONFIDENCE: f64 = 0.15;

const MAX_ACTIVITY_FACTOR: f64 = 1.5;
const MAX_QUEUE_FACTOR: f64 = 2.0;

/// Intermediate values of a Tier 1 computation, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tier1Breakdown {
    pub base_per_minute: f64,
    pub freshness_factor: f64,
    pub activity_factor: f64,
    pub final_factor: f64,
    pub msgs_per_sec: f64,
}

/// Estimates system throughput from a `MetricsSnapshot`.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputEstimator<'a> {
    config: &'a ThroughputConfig,
}

impl<'a> ThroughputEstimator<'a> {
    pub fn new(config: &'a ThroughputConfig) -> Self {
        Self { config }
    }

    /// Produce the estimate for one cycle.
    ///
    /// A stale snapshot still yields a value, at half the confidence.
    pub fn estimate(&self, snapshot: &MetricsSnapshot, stale: bool) -> ThroughputEstimate {
        let mut estimate = self.estimate_fresh(snapshot);
        if stale {
            estimate.confidence *= 0.5;
        }
        estimate
    }

    fn estimate_fresh(&self, snapshot: &MetricsSnapshot) -> ThroughputEstimate {
        if let Some(t1) = self.tier1(snapshot) {
            return ThroughputEstimate {
                value_msgs_per_sec: t1.msgs_per_sec,
                method_used: EstimationMethod::MetricsStream,
                confidence: TIER1_CONFIDENCE_BASE
                    + TIER1_CONFIDENCE_FRESHNESS * t1.freshness_factor,
                low_confidence_fallback: false,
            };
        }
        debug!(
            sample = ?snapshot.perf_sample,
            "metrics stream empty or stale, trying downstream activity"
        );

        if let Some(rate) = self.tier2(snapshot) {
            return ThroughputEstimate {
                value_msgs_per_sec: rate,
                method_used: EstimationMethod::DownstreamActivity,
                confidence: TIER2_CONFIDENCE,
                low_confidence_fallback: false,
            };
        }
        debug!("no recent downstream activity, estimating from consumers");

        let (rate, fallback) = self.tier3(snapshot);
        ThroughputEstimate {
            value_msgs_per_sec: rate,
            method_used: EstimationMethod::ConsumerActivity,
            confidence: if fallback {
                TIER3_FALLBACK_CONFIDENCE
            } else {
                TIER3_CONFIDENCE
            },
            low_confidence_fallback: fallback,
        }
    }

    /// Tier 1: freshness-weighted performance metrics stream.
    ///
    /// `None` when the sample is empty or its newest record is at least one
    /// freshness window old.
    pub fn tier1(&self, snapshot: &MetricsSnapshot) -> Option<Tier1Breakdown> {
        let cfg = self.config;
        let sample = snapshot.perf_sample?;
        let window_ms = cfg.freshness_window.as_millis() as u64;
        if sample.record_count == 0 || sample.newest_age_ms >= window_ms {
            return None;
        }

        let records = sample.record_count as f64;
        let base_per_minute = records * cfg.base_multiplier;
        let freshness = freshness_factor(
            cfg.decay,
            sample.newest_age_ms as f64 / MS_PER_MINUTE,
            window_ms as f64 / MS_PER_MINUTE,
            cfg.min_freshness_factor,
        );
        let activity = (records / cfg.activity_norm).min(MAX_ACTIVITY_FACTOR);
        let final_factor = freshness * cfg.freshness_weight + activity * cfg.activity_weight;

        Some(Tier1Breakdown {
            base_per_minute,
            freshness_factor: freshness,
            activity_factor: activity,
            final_factor,
            msgs_per_sec: base_per_minute * final_factor / 60.0,
        })
    }

    /// Tier 2: entries appended to downstream result streams per second.
    pub fn tier2(&self, snapshot: &MetricsSnapshot) -> Option<f64> {
        let total: u64 = snapshot.downstream.iter().map(|a| a.entries_in_window).sum();
        if total == 0 {
            return None;
        }
        let per_minute: f64 = snapshot
            .downstream
            .iter()
            .filter(|a| a.window_ms > 0)
            .map(|a| a.entries_in_window as f64 / (a.window_ms as f64 / MS_PER_MINUTE))
            .sum();
        Some(per_minute / 60.0)
    }

    /// Tier 3: consumer-activity heuristic. The flag is set when no consumer
    /// was active and the per-consumer constant was used instead.
    pub fn tier3(&self, snapshot: &MetricsSnapshot) -> (f64, bool) {
        let cfg = self.config;
        let threshold_ms = cfg.activity_threshold.as_millis() as u64;
        let active = snapshot
            .consumers
            .iter()
            .filter(|c| c.idle_ms < threshold_ms)
            .count();

        if active == 0 {
            let total = snapshot.consumers.len() as f64;
            return (cfg.idle_consumer_rate * total, true);
        }

        let queue_length = queue_length(snapshot) as f64;
        let stream_activity = (queue_length / 100.0).min(2.0);
        let base_rate = 5.0 + stream_activity * 3.0;
        let queue_factor = (queue_length / 200.0).min(MAX_QUEUE_FACTOR);
        let adjusted_rate = base_rate * (1.0 + queue_factor);

        ((active as f64 * adjusted_rate).min(cfg.throughput_ceiling), false)
    }
}

/// Pending entries across the observed consumer groups, falling back to the
/// consumers' own pending counts when no group was read.
fn queue_length(snapshot: &MetricsSnapshot) -> u64 {
    if snapshot.groups.is_empty() {
        snapshot.consumers.iter().map(|c| c.pending_count).sum()
    } else {
        snapshot.groups.iter().map(|g| g.pending_count).sum()
    }
}
