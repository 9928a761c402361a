//! Actuator seam and retry policy.
//!
//! The controller never talks to an orchestrator directly. It hands each
//! committed decision to an `ActuatorFn` and retries transient failures with
//! exponential backoff.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use pipescale_core::{ActuationOutcome, RetryConfig, ScalingDecision};

/// Boxed future returned by an actuator.
pub type BoxFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<ActuationOutcome>> + Send>>;

/// Callback that applies a scaling decision to the real world.
///
/// Returns `applied: false` when the orchestrator accepted the request but
/// chose not to act on it.
pub type ActuatorFn = Arc<dyn Fn(ScalingDecision) -> BoxFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActuationError {
    #[error("actuation for pool {pool_id} failed after {attempts} attempt(s): {last_error}")]
    Failed {
        pool_id: String,
        attempts: u32,
        last_error: String,
    },
}

/// Delay before retry number `attempt` (1-based): base doubled per attempt,
/// capped at `max_delay`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    config
        .base_delay
        .checked_mul(factor)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Apply `decision` through `actuator`, retrying errors up to
/// `max_attempts` times.
///
/// An `applied: false` outcome is a failure but is not retried: the
/// orchestrator answered and said no.
pub async fn apply_with_retry(
    actuator: &ActuatorFn,
    decision: &ScalingDecision,
    config: &RetryConfig,
) -> Result<ActuationOutcome, ActuationError> {
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match actuator(decision.clone()).await {
            Ok(outcome) if outcome.applied => return Ok(outcome),
            Ok(_) => {
                warn!(pool = %decision.pool_id, attempt, "actuator declined decision");
                return Err(ActuationError::Failed {
                    pool_id: decision.pool_id.clone(),
                    attempts: attempt,
                    last_error: "actuator declined the decision".to_string(),
                });
            }
            Err(e) => {
                last_error = format!("{e:#}");
                if attempt < max_attempts {
                    let delay = backoff_delay(config, attempt);
                    warn!(
                        pool = %decision.pool_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "actuation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    warn!(
        pool = %decision.pool_id,
        attempts = max_attempts,
        error = %last_error,
        "actuation failed, giving up"
    );
    Err(ActuationError::Failed {
        pool_id: decision.pool_id.clone(),
        attempts: max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipescale_core::ScaleAction;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn decision() -> ScalingDecision {
        ScalingDecision {
            pool_id: "bearing".to_string(),
            action: ScaleAction::ScaleUp,
            current_count: 2,
            target_count: 3,
            load_score: Some(0.8),
            confidence: 0.7,
            reasoning: vec![],
            decided_at_ms: 0,
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    /// Actuator that fails `failures` times before succeeding.
    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> ActuatorFn {
        Arc::new(move |d: ScalingDecision| -> BoxFuture {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    anyhow::bail!("orchestrator unavailable (call {n})");
                }
                Ok(ActuationOutcome {
                    applied: true,
                    new_count: d.target_count,
                })
            })
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 10), Duration::from_secs(30));
        assert_eq!(backoff_delay(&config, 100), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn succeeds_first_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = apply_with_retry(&flaky(0, calls.clone()), &decision(), &fast_retry())
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.new_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = apply_with_retry(&flaky(2, calls.clone()), &decision(), &fast_retry())
            .await
            .unwrap();
        assert_eq!(outcome.new_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = apply_with_retry(&flaky(10, calls.clone()), &decision(), &fast_retry())
            .await
            .unwrap_err();
        let ActuationError::Failed {
            pool_id,
            attempts,
            last_error,
        } = err;
        assert_eq!(pool_id, "bearing");
        assert_eq!(attempts, 3);
        assert!(last_error.contains("call 3"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn declined_outcome_fails_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let actuator: ActuatorFn = Arc::new(move |d: ScalingDecision| -> BoxFuture {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok::<_, anyhow::Error>(ActuationOutcome {
                    applied: false,
                    new_count: d.current_count,
                })
            })
        });
        let err = apply_with_retry(&actuator, &decision(), &fast_retry())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActuationError::Failed {
                pool_id: "bearing".to_string(),
                attempts: 1,
                last_error: "actuator declined the decision".to_string(),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
