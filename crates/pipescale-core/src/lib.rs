//! pipescale-core — shared model for the pipeline scaling controller.
//!
//! Holds the telemetry snapshot, throughput/health/decision types that flow
//! between the collector, estimator, classifier and decision engine, plus
//! the single explicit `ControllerPolicy` every component reads its tuning
//! from.
//!
//! # Data flow
//!
//! ```text
//! TelemetrySource ──► MetricsSnapshot ──┬─► ThroughputEstimate ──┐
//!                                       └─► PoolHealth ──────────┴─► ScalingDecision
//! ```

pub mod duration;
pub mod error;
pub mod policy;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use policy::*;
pub use types::*;
