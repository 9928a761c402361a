//! pipescale-throughput — system throughput from noisy telemetry.
//!
//! Produces one `ThroughputEstimate` per snapshot. Three tiers are tried in
//! order and the first whose preconditions hold supplies the value; falling
//! through is the designed degradation path, never an error.
//!
//! # Tiers
//!
//! ```text
//! 1. metrics stream   base × (freshness·w_f + activity·w_a) / 60
//!                     while the newest performance record is younger than W
//! 2. downstream       entries appended to result streams in the window / minutes / 60
//! 3. consumers        active consumers × queue-adjusted rate, capped
//! ```
//!
//! Tier 1 counts sampled records of the performance stream, so it tracks how
//! often the pipeline reports, not how much upstream data arrives. The other
//! tiers are tuned against its magnitude; keep the formula as it is.

pub mod decay;
pub mod estimator;

pub use decay::freshness_factor;
pub use estimator::{ThroughputEstimator, Tier1Breakdown};
