//! pipescale-metrics — telemetry collection for the scaling controller.
//!
//! Polls a read-only `TelemetrySource` (stream lengths, consumer-group
//! pending counts, consumer idle times, host CPU/memory) and assembles one
//! immutable `MetricsSnapshot` per cycle. Also renders the controller's
//! status report in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── collect() → MetricsSnapshot (per-item faults, bounded by poll_timeout)
//!   └── poll()    → CollectedSnapshot (reuse-once, stale marking)
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for a textfile collector or /metrics
//! ```

pub mod collector;
pub mod prometheus;
pub mod telemetry;

pub use collector::{
    CollectError, CollectedSnapshot, MetricsCollector, consumer_fault_source, stream_fault_source,
};
pub use prometheus::render_prometheus;
pub use telemetry::{
    ConsumerInfo, GroupDocument, GroupInfo, StaticTelemetry, StreamDocument, StreamInfo,
    TelemetryDocument, TelemetryError, TelemetryResult, TelemetrySource,
};
