//! pipescale-health — consumer health classification.
//!
//! Every consumer is bucketed purely from the idle duration in the current
//! snapshot; there is no state carried between cycles.
//!
//! ```text
//! idle <  healthy_below              → Healthy
//! healthy_below ≤ idle < critical_at → Warning
//! idle ≥ critical_at                 → Critical
//! ```
//!
//! Pools aggregate their consumers into counts and a healthy ratio; the
//! cluster figure is the mean of pool ratios, so a pool of two consumers
//! weighs as much as a pool of twenty.

pub mod classifier;

pub use classifier::{
    PoolReport, classify_cluster, classify_consumer, classify_pool, cluster_health_percent,
};
