//! Decision engine — per-pool scaling state machine.
//!
//! The engine is pure over its inputs: the caller owns each pool's
//! `ScalingState` (behind a per-pool lock) and passes it in mutably, so one
//! evaluation is a single read-modify-write.

use tracing::{debug, info};

use pipescale_core::{
    ActuationOutcome, HostStats, PoolConfig, PoolHealth, PoolPhase, ScaleAction, ScalingDecision,
    ScalingPolicy, ScalingState, ThroughputEstimate,
};

use crate::actuator::ActuationError;

/// Everything one pool evaluation reads from the current cycle.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub pool_health: &'a PoolHealth,
    pub throughput: &'a ThroughputEstimate,
    pub host: Option<HostStats>,
    /// The snapshot (or this pool's part of it) cannot be trusted.
    pub stale: bool,
}

/// Components of the load score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadBreakdown {
    /// pending / backlog_norm, capped at 1.
    pub backlog_ratio: f64,
    /// 1 − healthy_ratio.
    pub unhealthy_ratio: f64,
    /// throughput / (consumers × capacity), capped at 1.
    pub utilisation: f64,
    /// Weighted blend of the three, in [0, 1].
    pub score: f64,
}

/// Evaluates pools against a `ScalingPolicy`.
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine<'a> {
    policy: &'a ScalingPolicy,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(policy: &'a ScalingPolicy) -> Self {
        Self { policy }
    }

    /// Compute the load score for a pool running `current_count` consumers.
    pub fn load_score(
        &self,
        pool: &PoolConfig,
        input: &EvaluationInput<'_>,
        current_count: u32,
    ) -> LoadBreakdown {
        let p = self.policy;
        let backlog_ratio = (input.pool_health.pending_backlog as f64 / p.backlog_norm).min(1.0);
        let unhealthy_ratio = (1.0 - input.pool_health.healthy_ratio).clamp(0.0, 1.0);

        let capacity = f64::from(current_count) * pool.capacity(p);
        let throughput = input.throughput.value_msgs_per_sec.max(0.0);
        let utilisation = if capacity > 0.0 {
            (throughput / capacity).min(1.0)
        } else if throughput > 0.0 {
            1.0
        } else {
            0.0
        };

        let score = (backlog_ratio * p.backlog_weight
            + unhealthy_ratio * p.health_weight
            + utilisation * p.throughput_weight)
            .clamp(0.0, 1.0);

        LoadBreakdown {
            backlog_ratio,
            unhealthy_ratio,
            utilisation,
            score,
        }
    }

    /// Decide what to do with one pool and update its state.
    ///
    /// A committed scale decision moves the pool to `Acting`, stamps the
    /// cooldown and marks an actuation in flight. `current_count` is left
    /// alone until `complete_actuation` reports success.
    pub fn evaluate(
        &self,
        pool: &PoolConfig,
        input: &EvaluationInput<'_>,
        state: &mut ScalingState,
        now_ms: u64,
    ) -> ScalingDecision {
        let p = self.policy;
        let current = state.current_count;
        let throughput_confidence = input.throughput.confidence;
        let maintain = |reasoning: Vec<String>, load_score: Option<f64>, confidence: f64| {
            ScalingDecision {
                pool_id: pool.id.clone(),
                action: ScaleAction::Maintain,
                current_count: current,
                target_count: current,
                load_score,
                confidence,
                reasoning,
                decided_at_ms: now_ms,
            }
        };

        if input.stale {
            debug!(pool = %pool.id, "stale metrics, holding");
            let decision = maintain(vec!["stale_metrics".to_string()], None, 0.0);
            state.last_decision = Some(decision.clone());
            return decision;
        }

        let backlog = input.pool_health.pending_backlog;
        let previous_backlog = state.last_backlog.replace(backlog);

        if state.in_flight {
            let decision = maintain(
                vec!["actuation_in_flight".to_string()],
                None,
                throughput_confidence.min(1.0),
            );
            state.last_decision = Some(decision.clone());
            return decision;
        }

        let cooldown_ms = p.cooldown.as_millis() as u64;
        if let Some(last) = state.last_scale_at_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < cooldown_ms {
                state.phase = PoolPhase::Cooling;
                let remaining_secs = (cooldown_ms - elapsed).div_ceil(1000);
                let decision = maintain(
                    vec![format!("cooldown: {remaining_secs}s remaining")],
                    None,
                    throughput_confidence.min(1.0),
                );
                state.last_decision = Some(decision.clone());
                return decision;
            }
        }
        state.phase = PoolPhase::Evaluating;

        let load = self.load_score(pool, input, current);
        let mut reasoning = load_reasons(p, input.pool_health, &load);
        let min = pool.min(p);
        let max = pool.max(p);

        let decision = if load.score > p.high_load_threshold {
            reasoning.push(format!(
                "load score {:.2} > high threshold {:.2}",
                load.score, p.high_load_threshold
            ));
            let target = current.saturating_add(p.scale_step).min(max).max(min);
            let blocked = self.scale_up_blockers(input.host, current, target);
            if blocked.is_empty() {
                self.scale(
                    pool,
                    ScaleAction::ScaleUp,
                    current,
                    target,
                    &load,
                    reasoning,
                    throughput_confidence,
                    now_ms,
                )
            } else {
                info!(
                    pool = %pool.id,
                    reasons = ?blocked,
                    score = load.score,
                    "safety gate blocked scale-up"
                );
                reasoning.extend(blocked);
                maintain(reasoning, Some(load.score), throughput_confidence.min(1.0))
            }
        } else if load.score < p.low_load_threshold {
            reasoning.push(format!(
                "load score {:.2} < low threshold {:.2}",
                load.score, p.low_load_threshold
            ));
            let target = current.saturating_sub(p.scale_step).max(min).min(max.max(min));
            let mut blocked = Vec::new();
            if current <= min || target >= current {
                blocked.push("at_min_consumers".to_string());
            }
            if let Some(prev) = previous_backlog
                && backlog > 0
                && backlog > prev
            {
                blocked.push("backlog_growing".to_string());
                blocked.push(format!("pending backlog grew {prev} -> {backlog}"));
            }
            if blocked.is_empty() {
                self.scale(
                    pool,
                    ScaleAction::ScaleDown,
                    current,
                    target,
                    &load,
                    reasoning,
                    throughput_confidence,
                    now_ms,
                )
            } else {
                debug!(pool = %pool.id, reasons = ?blocked, "scale-down rejected");
                reasoning.extend(blocked);
                maintain(reasoning, Some(load.score), throughput_confidence.min(1.0))
            }
        } else {
            reasoning.push(format!(
                "load score {:.2} within [{:.2}, {:.2}]",
                load.score, p.low_load_threshold, p.high_load_threshold
            ));
            let confidence = self.threshold_confidence(load.score).min(throughput_confidence);
            maintain(reasoning, Some(load.score), confidence)
        };

        if decision.is_actionable() {
            state.phase = PoolPhase::Acting;
            state.in_flight = true;
            state.last_scale_at_ms = Some(now_ms);
            info!(
                pool = %pool.id,
                action = decision.action.as_str(),
                from = decision.current_count,
                to = decision.target_count,
                score = load.score,
                confidence = decision.confidence,
                "scaling decision committed"
            );
        }
        state.last_decision = Some(decision.clone());
        decision
    }

    /// Reasons a scale-up must not happen. Empty when it may proceed.
    fn scale_up_blockers(&self, host: Option<HostStats>, current: u32, target: u32) -> Vec<String> {
        let p = self.policy;
        let mut blocked = Vec::new();
        match host {
            None => blocked.push("host_metrics_unavailable".to_string()),
            Some(host) => {
                if host.cpu_percent > p.cpu_safe_percent {
                    blocked.push("cpu_unsafe".to_string());
                    blocked.push(format!(
                        "cpu {:.1}% > safe threshold {:.1}%",
                        host.cpu_percent, p.cpu_safe_percent
                    ));
                }
                if host.memory_percent > p.memory_safe_percent {
                    blocked.push("memory_unsafe".to_string());
                    blocked.push(format!(
                        "memory {:.1}% > safe threshold {:.1}%",
                        host.memory_percent, p.memory_safe_percent
                    ));
                }
            }
        }
        if target <= current {
            blocked.push("at_max_consumers".to_string());
        }
        blocked
    }

    #[allow(clippy::too_many_arguments)]
    fn scale(
        &self,
        pool: &PoolConfig,
        action: ScaleAction,
        current: u32,
        target: u32,
        load: &LoadBreakdown,
        reasoning: Vec<String>,
        throughput_confidence: f64,
        now_ms: u64,
    ) -> ScalingDecision {
        ScalingDecision {
            pool_id: pool.id.clone(),
            action,
            current_count: current,
            target_count: target,
            load_score: Some(load.score),
            confidence: self.threshold_confidence(load.score).min(throughput_confidence),
            reasoning,
            decided_at_ms: now_ms,
        }
    }

    /// 0.5 on a threshold, rising to 1.0 as the score moves away from the
    /// nearest one.
    pub fn threshold_confidence(&self, score: f64) -> f64 {
        let high = self.policy.high_load_threshold;
        let low = self.policy.low_load_threshold;
        let distance = if score > high {
            (score - high) / (1.0 - high)
        } else if score < low {
            (low - score) / low
        } else {
            (score - low).min(high - score) / ((high - low) / 2.0)
        };
        let distance = if distance.is_finite() { distance.clamp(0.0, 1.0) } else { 1.0 };
        0.5 + 0.5 * distance
    }

    /// Record the actuator's verdict on a committed decision.
    ///
    /// The count only changes on success; the cooldown stamp is kept either
    /// way so a failing actuator is not hammered every cycle.
    pub fn complete_actuation(
        state: &mut ScalingState,
        decision: &ScalingDecision,
        result: &Result<ActuationOutcome, ActuationError>,
    ) {
        state.in_flight = false;
        state.phase = PoolPhase::Cooling;
        match result {
            Ok(outcome) if outcome.applied => {
                info!(
                    pool = %state.pool_id,
                    from = state.current_count,
                    to = outcome.new_count,
                    "actuation applied"
                );
                state.current_count = outcome.new_count;
            }
            Ok(_) => {
                info!(
                    pool = %state.pool_id,
                    action = decision.action.as_str(),
                    count = state.current_count,
                    "actuator declined decision, count unchanged"
                );
            }
            Err(e) => {
                info!(
                    pool = %state.pool_id,
                    error = %e,
                    count = state.current_count,
                    "actuation failed, count unchanged"
                );
            }
        }
    }
}

/// Split a system-wide throughput estimate across pools.
///
/// Each pool gets the share of the total pending backlog it holds. With no
/// backlog anywhere the split follows healthy consumers, then observed
/// consumers, then falls back to an even split. Confidence and method carry
/// over unchanged. The result is in the order of `pools`.
pub fn apportion_throughput(
    total: &ThroughputEstimate,
    pools: &[PoolHealth],
) -> Vec<ThroughputEstimate> {
    let keys: [fn(&PoolHealth) -> f64; 3] = [
        |h| h.pending_backlog as f64,
        |h| f64::from(h.healthy),
        |h| f64::from(h.total),
    ];
    let weights: Vec<f64> = keys
        .iter()
        .map(|key| pools.iter().map(key).collect::<Vec<f64>>())
        .find(|w| w.iter().sum::<f64>() > 0.0)
        .unwrap_or_else(|| vec![1.0; pools.len()]);
    let sum: f64 = weights.iter().sum();

    weights
        .iter()
        .map(|w| ThroughputEstimate {
            value_msgs_per_sec: total.value_msgs_per_sec * w / sum,
            ..*total
        })
        .collect()
}

/// Human-readable triggers behind a load score.
fn load_reasons(p: &ScalingPolicy, health: &PoolHealth, load: &LoadBreakdown) -> Vec<String> {
    let mut reasons = Vec::new();
    if health.pending_backlog as f64 > p.backlog_norm {
        reasons.push(format!(
            "pending backlog {} > norm {}",
            health.pending_backlog, p.backlog_norm
        ));
    }
    if health.total > 0 && health.healthy < health.total {
        reasons.push(format!(
            "healthy consumers {}/{} (ratio {:.2})",
            health.healthy, health.total, health.healthy_ratio
        ));
    }
    if health.total == 0 {
        reasons.push("no consumers observed".to_string());
    }
    if load.utilisation >= 1.0 {
        reasons.push("throughput at or above pool capacity".to_string());
    }
    reasons
}
