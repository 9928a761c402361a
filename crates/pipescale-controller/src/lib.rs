//! pipescale-controller — the scaling control loop.
//!
//! # Cycle
//!
//! ```text
//! policy reload? ─► poll telemetry ─► Arc<MetricsSnapshot>
//!                                        │
//!                    ThroughputEstimate ◄┤ (once per cycle)
//!                                        │
//!        classify pools ─► split throughput by backlog share
//!                                        │
//!             JoinSet: one task per pool ┴─► lock state ─► evaluate
//!                                                              │
//!             tokio::spawn(apply_with_retry) ◄── committed ────┘
//!                                        │
//!                     complete_actuation + persist + event
//! ```
//!
//! A reused snapshot (one failed poll) still feeds the throughput estimate
//! and the status report, but every pool holds with `stale_metrics`.
//!
//! The `StatusBoard` is republished at the end of every cycle. Shutdown is a
//! `watch` channel; once it flips no further decision is emitted.

pub mod controller;
pub mod reload;
pub mod status;

pub use controller::{Controller, ControllerEvent, CycleReport};
pub use reload::PolicyWatcher;
pub use status::StatusBoard;
