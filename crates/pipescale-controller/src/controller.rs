//! Control loop — one cycle per poll interval.
//!
//! Each cycle polls telemetry once, estimates throughput once, then
//! evaluates every pool concurrently against that same `Arc` snapshot.
//! Committed decisions are handed to the actuator on their own tasks so a
//! slow orchestrator never delays the next cycle; the pool's `in_flight`
//! flag keeps a second action from being issued meanwhile.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use pipescale_autoscale::{
    ActuationError, ActuatorFn, DecisionEngine, EvaluationInput, apply_with_retry,
    apportion_throughput,
};
use pipescale_core::{
    ClusterHealth, ControllerPolicy, MetricsSnapshot, PoolHealth, PoolPhase, RetryConfig,
    ScalingDecision, ScalingState, StatusReport, ThroughputEstimate,
};
use pipescale_health::{classify_pool, cluster_health_percent};
use pipescale_metrics::{MetricsCollector, TelemetrySource, consumer_fault_source};
use pipescale_state::StateStore;
use pipescale_throughput::ThroughputEstimator;

use crate::reload::PolicyWatcher;
use crate::status::StatusBoard;

const EVENT_CAPACITY: usize = 256;

/// Notable things that happened during a cycle or an actuation.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A scale decision was committed and sent to the actuator.
    DecisionCommitted { decision: ScalingDecision },
    ActuationApplied { pool_id: String, new_count: u32 },
    ActuationFailed {
        pool_id: String,
        attempts: u32,
        error: String,
    },
    PolicyReloaded { pools: usize },
    /// A changed policy file failed to load; the previous policy stays.
    PolicyRejected { error: String },
    /// Collection failed this cycle.
    TelemetryUnavailable {
        consecutive_failures: u32,
        /// The previous snapshot was served instead.
        reused: bool,
    },
}

/// What one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub status: StatusReport,
    /// Decisions handed to the actuator this cycle.
    pub dispatched: Vec<ScalingDecision>,
}

/// Per-pool slot guarded by its own lock.
#[derive(Debug)]
struct PoolSlot {
    state: ScalingState,
    /// `current_count` reflects reality: restored from the store or taken
    /// from the first fresh observation.
    seeded: bool,
}

type SharedSlot = Arc<Mutex<PoolSlot>>;

struct PoolEvaluation {
    index: usize,
    health: PoolHealth,
    decision: ScalingDecision,
    state: ScalingState,
}

/// Ties collector, estimator, classifier, engine and actuator together.
pub struct Controller<T> {
    policy: Arc<ControllerPolicy>,
    collector: MetricsCollector<T>,
    actuator: ActuatorFn,
    slots: HashMap<String, SharedSlot>,
    store: Option<StateStore>,
    watcher: Option<PolicyWatcher>,
    status: StatusBoard,
    events: broadcast::Sender<ControllerEvent>,
    shutdown: watch::Receiver<bool>,
    actuations: Vec<JoinHandle<()>>,
}

impl<T: TelemetrySource + 'static> Controller<T> {
    pub fn new(
        policy: ControllerPolicy,
        source: Arc<T>,
        actuator: ActuatorFn,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut controller = Self {
            policy: Arc::new(policy),
            collector: MetricsCollector::new(source),
            actuator,
            slots: HashMap::new(),
            store: None,
            watcher: None,
            status: StatusBoard::new(),
            events,
            shutdown,
            actuations: Vec::new(),
        };
        controller.sync_pools();
        controller
    }

    /// Persist scaling state in `store` and resume any state found there.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self.slots.clear();
        self.sync_pools();
        self
    }

    /// Reload the policy from `watcher` whenever its file changes.
    pub fn with_policy_watcher(mut self, watcher: PolicyWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn status_board(&self) -> StatusBoard {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn policy(&self) -> Arc<ControllerPolicy> {
        Arc::clone(&self.policy)
    }

    /// Current scaling state of one pool.
    pub async fn pool_state(&self, pool_id: &str) -> Option<ScalingState> {
        let slot = self.slots.get(pool_id)?;
        Some(slot.lock().await.state.clone())
    }

    /// Swap in a new (already validated) policy between cycles.
    pub fn replace_policy(&mut self, policy: ControllerPolicy) {
        info!(pools = policy.pools.len(), "policy replaced");
        self.policy = Arc::new(policy);
        self.sync_pools();
        self.emit(ControllerEvent::PolicyReloaded {
            pools: self.policy.pools.len(),
        });
    }

    /// Run cycles on the policy's poll interval until shutdown.
    ///
    /// Waits for in-flight actuations before returning.
    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();
        let mut period = self.policy.metrics.poll_interval;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = period.as_millis() as u64,
            pools = self.policy.pools.len(),
            "controller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.run_cycle().await.is_none() && self.is_shutting_down() {
                        break;
                    }
                    let wanted = self.policy.metrics.poll_interval;
                    if wanted != period {
                        info!(
                            from_ms = period.as_millis() as u64,
                            to_ms = wanted.as_millis() as u64,
                            "poll interval changed"
                        );
                        period = wanted;
                        ticker = tokio::time::interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                _ = shutdown.changed() => {
                    info!("controller shutting down");
                    break;
                }
            }
        }

        self.wait_for_actuations().await;
        info!("controller stopped");
    }

    /// One cycle at the current wall-clock time.
    pub async fn run_cycle(&mut self) -> Option<CycleReport> {
        self.run_cycle_at(epoch_millis()).await
    }

    /// One cycle at `now_ms`. `None` once shutdown has been signalled.
    pub async fn run_cycle_at(&mut self, now_ms: u64) -> Option<CycleReport> {
        if self.is_shutting_down() {
            return None;
        }
        self.actuations.retain(|h| !h.is_finished());
        self.reload_policy();
        let policy = Arc::clone(&self.policy);

        // `stale` describes the data; `blind` also covers a reused snapshot,
        // which may feed the estimate and status but never a decision.
        let (snapshot, stale, blind) = match self.collector.poll_at(&policy, now_ms).await {
            Ok(collected) => {
                if collected.reused {
                    self.emit(ControllerEvent::TelemetryUnavailable {
                        consecutive_failures: self.collector.consecutive_failures(),
                        reused: true,
                    });
                }
                let blind = collected.stale || collected.reused;
                (collected.snapshot, collected.stale, blind)
            }
            Err(e) => {
                warn!(error = %e, "telemetry unavailable and no snapshot to reuse");
                self.emit(ControllerEvent::TelemetryUnavailable {
                    consecutive_failures: self.collector.consecutive_failures(),
                    reused: false,
                });
                let empty = MetricsSnapshot {
                    taken_at_ms: now_ms,
                    ..Default::default()
                };
                (Arc::new(empty), true, true)
            }
        };

        let throughput = ThroughputEstimator::new(&policy.throughput).estimate(&snapshot, stale);

        let healths: Vec<PoolHealth> = policy
            .pools
            .iter()
            .map(|pool| classify_pool(pool, &snapshot, &policy.health).health)
            .collect();
        let shares = apportion_throughput(&throughput, &healths);

        let mut tasks = JoinSet::new();
        let per_pool = policy.pools.iter().zip(healths.into_iter().zip(shares));
        for (index, (pool, (health, share))) in per_pool.enumerate() {
            let Some(slot) = self.slots.get(&pool.id).cloned() else {
                continue;
            };
            tasks.spawn(evaluate_pool(
                index,
                Arc::clone(&policy),
                Arc::clone(&snapshot),
                health,
                slot,
                share,
                blind,
                self.shutdown.clone(),
                now_ms,
            ));
        }

        let mut evaluations = Vec::with_capacity(policy.pools.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(evaluation)) => evaluations.push(evaluation),
                Ok(None) => {}
                Err(e) => error!(error = %e, "pool evaluation task failed"),
            }
        }

        if self.is_shutting_down() {
            debug!("shutdown during cycle, dropping decisions");
            return None;
        }
        evaluations.sort_by_key(|e| e.index);

        let mut dispatched = Vec::new();
        for evaluation in &evaluations {
            if let Some(store) = &self.store {
                persist(store, &evaluation.state);
            }
            if !evaluation.decision.is_actionable() {
                continue;
            }
            let Some(slot) = self.slots.get(&evaluation.decision.pool_id).cloned() else {
                continue;
            };
            self.emit(ControllerEvent::DecisionCommitted {
                decision: evaluation.decision.clone(),
            });
            self.dispatch(evaluation.decision.clone(), slot, policy.actuator.clone());
            dispatched.push(evaluation.decision.clone());
        }

        let pools: Vec<PoolHealth> = evaluations.iter().map(|e| e.health.clone()).collect();
        let status = StatusReport {
            generated_at_ms: now_ms,
            throughput: Some(throughput),
            cluster: ClusterHealth {
                health_percent: cluster_health_percent(&pools),
                pools,
            },
            decisions: evaluations.into_iter().map(|e| e.decision).collect(),
            stale,
        };
        self.status.publish(status.clone()).await;

        info!(
            throughput = status.throughput.map(|t| t.value_msgs_per_sec),
            health_percent = status.cluster.health_percent,
            stale,
            dispatched = dispatched.len(),
            "cycle complete"
        );

        Some(CycleReport { status, dispatched })
    }

    /// Await every actuation still running.
    pub async fn wait_for_actuations(&mut self) {
        for handle in self.actuations.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "actuation task failed");
            }
        }
    }

    fn dispatch(&mut self, decision: ScalingDecision, slot: SharedSlot, retry: RetryConfig) {
        let actuator = Arc::clone(&self.actuator);
        let store = self.store.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let result = apply_with_retry(&actuator, &decision, &retry).await;

            let mut slot = slot.lock().await;
            DecisionEngine::complete_actuation(&mut slot.state, &decision, &result);
            if let Some(store) = &store {
                persist(store, &slot.state);
            }

            let event = match result {
                Ok(outcome) => ControllerEvent::ActuationApplied {
                    pool_id: decision.pool_id.clone(),
                    new_count: outcome.new_count,
                },
                Err(ActuationError::Failed {
                    pool_id,
                    attempts,
                    last_error,
                }) => ControllerEvent::ActuationFailed {
                    pool_id,
                    attempts,
                    error: last_error,
                },
            };
            let _ = events.send(event);
        });
        self.actuations.push(handle);
    }

    fn reload_policy(&mut self) {
        let outcome = match self.watcher.as_mut() {
            Some(watcher) => watcher.check(),
            None => return,
        };
        match outcome {
            None => {}
            Some(Ok(policy)) => self.replace_policy(policy),
            Some(Err(e)) => {
                warn!(error = %e, "policy reload rejected, keeping previous policy");
                self.emit(ControllerEvent::PolicyRejected {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Create slots for new pools and drop slots for removed ones.
    fn sync_pools(&mut self) {
        let policy = Arc::clone(&self.policy);
        self.slots
            .retain(|id, _| policy.pools.iter().any(|p| &p.id == id));

        for pool in &policy.pools {
            if self.slots.contains_key(&pool.id) {
                continue;
            }
            let restored = self.store.as_ref().and_then(|s| restore(s, &pool.id));
            let slot = match restored {
                Some(state) => PoolSlot {
                    state,
                    seeded: true,
                },
                None => PoolSlot {
                    state: ScalingState::new(&pool.id, pool.min(&policy.scaling)),
                    seeded: false,
                },
            };
            debug!(pool = %pool.id, seeded = slot.seeded, "pool registered");
            self.slots
                .insert(pool.id.clone(), Arc::new(Mutex::new(slot)));
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[allow(clippy::too_many_arguments)]
async fn evaluate_pool(
    index: usize,
    policy: Arc<ControllerPolicy>,
    snapshot: Arc<MetricsSnapshot>,
    health: PoolHealth,
    slot: SharedSlot,
    throughput: ThroughputEstimate,
    stale: bool,
    shutdown: watch::Receiver<bool>,
    now_ms: u64,
) -> Option<PoolEvaluation> {
    let pool = policy.pools.get(index)?;

    // A pool whose consumers could not be listed has no usable health.
    let consumers_missing = snapshot
        .faults
        .iter()
        .any(|f| f.source == consumer_fault_source(&pool.stream, &pool.group));
    let pool_stale = stale || consumers_missing;

    let mut slot = slot.lock().await;
    let stopping = *shutdown.borrow();
    if stopping {
        return None;
    }

    if !slot.seeded && !pool_stale {
        debug!(pool = %pool.id, count = health.total, "seeded consumer count from telemetry");
        slot.state.current_count = health.total;
        slot.seeded = true;
    }

    let input = EvaluationInput {
        pool_health: &health,
        throughput: &throughput,
        host: snapshot.host,
        stale: pool_stale,
    };
    let decision =
        DecisionEngine::new(&policy.scaling).evaluate(pool, &input, &mut slot.state, now_ms);

    Some(PoolEvaluation {
        index,
        health,
        decision,
        state: slot.state.clone(),
    })
}

fn restore(store: &StateStore, pool_id: &str) -> Option<ScalingState> {
    match store.get_scaling_state(pool_id) {
        Ok(Some(mut state)) => {
            if state.in_flight {
                warn!(
                    pool = %pool_id,
                    count = state.current_count,
                    "actuation was in flight at last shutdown, count may be out of date"
                );
                state.in_flight = false;
                state.phase = PoolPhase::Cooling;
            }
            info!(pool = %pool_id, count = state.current_count, "restored scaling state");
            Some(state)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(pool = %pool_id, error = %e, "failed to restore scaling state");
            None
        }
    }
}

fn persist(store: &StateStore, state: &ScalingState) {
    if let Err(e) = store.put_scaling_state(state) {
        warn!(pool = %state.pool_id, error = %e, "failed to persist scaling state");
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
