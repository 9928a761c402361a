//! pipescale-autoscale — scaling decisions per worker pool.
//!
//! Blends backlog, consumer health and throughput into a load score, then
//! turns it into `scale_up` / `scale_down` / `maintain` under three guards:
//! a cooldown window, host resource safety, and a single in-flight
//! actuation per pool.
//!
//! # Decision pipeline
//!
//! ```text
//! stale metrics?          → maintain ("stale_metrics")
//! actuation in flight?    → maintain ("actuation_in_flight")
//! inside cooldown?        → maintain, phase Cooling
//! load_score > high       → scale_up   unless cpu/memory unsafe or at max
//! load_score < low        → scale_down unless at floor or backlog growing
//! otherwise               → maintain
//! ```
//!
//! Target counts move by at most `scale_step` per decision and stay inside
//! the pool's `[min, max]`.

pub mod actuator;
pub mod engine;

pub use actuator::{ActuationError, ActuatorFn, apply_with_retry};
pub use engine::{DecisionEngine, EvaluationInput, LoadBreakdown, apportion_throughput};
