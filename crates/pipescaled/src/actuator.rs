//! Dry-run actuator: logs each decision and reports it as applied.

use std::sync::Arc;

use tracing::info;

use pipescale_autoscale::ActuatorFn;
use pipescale_autoscale::actuator::BoxFuture;
use pipescale_core::{ActuationOutcome, ScalingDecision};

pub fn dry_run_actuator() -> ActuatorFn {
    Arc::new(|decision: ScalingDecision| -> BoxFuture {
        Box::pin(async move {
            info!(
                pool = %decision.pool_id,
                action = decision.action.as_str(),
                from = decision.current_count,
                to = decision.target_count,
                confidence = decision.confidence,
                reasoning = ?decision.reasoning,
                "dry run: would scale pool"
            );
            Ok::<_, anyhow::Error>(ActuationOutcome {
                applied: true,
                new_count: decision.target_count,
            })
        })
    })
}
