//! Metrics collector — assembles one `MetricsSnapshot` per poll cycle.
//!
//! Every telemetry item is read with its own `Result`; a failing stream or
//! group becomes a `TelemetryFault` in the snapshot instead of aborting the
//! cycle. Only when nothing at all could be read (or the poll timed out) is
//! the cycle a `TelemetryUnavailable` failure, in which case `poll()` hands
//! out the previous snapshot once before flagging data as stale.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, warn};

use pipescale_core::{
    ConsumerStats, ControllerPolicy, GroupStats, MetricsSnapshot, PerfSample, StreamActivity,
    StreamStats, TelemetryFault,
};

use crate::telemetry::{TelemetryError, TelemetrySource};

/// Why a collection cycle produced no snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectError {
    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("telemetry poll timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of one `poll()`.
#[derive(Debug, Clone)]
pub struct CollectedSnapshot {
    pub snapshot: Arc<MetricsSnapshot>,
    /// Downstream consumers must not act on this data.
    pub stale: bool,
    /// The snapshot is a previous cycle's, reused after a failed collection.
    pub reused: bool,
}

/// Fault source label for a stream read.
pub fn stream_fault_source(stream: &str) -> String {
    format!("stream:{stream}")
}

/// Fault source label for a consumer listing.
pub fn consumer_fault_source(stream: &str, group: &str) -> String {
    format!("consumers:{stream}/{group}")
}

/// Polls a `TelemetrySource` and tracks the last good snapshot.
pub struct MetricsCollector<T> {
    source: Arc<T>,
    last: Option<Arc<MetricsSnapshot>>,
    consecutive_failures: u32,
}

impl<T: TelemetrySource> MetricsCollector<T> {
    pub fn new(source: Arc<T>) -> Self {
        Self {
            source,
            last: None,
            consecutive_failures: 0,
        }
    }

    /// The most recent successfully collected snapshot.
    pub fn last_snapshot(&self) -> Option<Arc<MetricsSnapshot>> {
        self.last.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Collect a snapshot stamped with the current wall clock.
    pub async fn collect(
        &self,
        policy: &ControllerPolicy,
    ) -> Result<MetricsSnapshot, CollectError> {
        self.collect_at(policy, epoch_millis()).await
    }

    /// Collect a snapshot stamped with `now_ms`, bounded by `poll_timeout`.
    pub async fn collect_at(
        &self,
        policy: &ControllerPolicy,
        now_ms: u64,
    ) -> Result<MetricsSnapshot, CollectError> {
        let timeout = policy.metrics.poll_timeout;
        tokio::time::timeout(timeout, self.read_all(policy, now_ms))
            .await
            .map_err(|_| CollectError::Timeout(timeout))?
    }

    async fn read_all(
        &self,
        policy: &ControllerPolicy,
        now_ms: u64,
    ) -> Result<MetricsSnapshot, CollectError> {
        self.source
            .refresh()
            .await
            .map_err(|e| CollectError::TelemetryUnavailable(e.to_string()))?;

        let mut snap = MetricsSnapshot {
            taken_at_ms: now_ms,
            ..Default::default()
        };
        let mut reads_ok = 0usize;

        for name in policy.watched_streams() {
            match self.source.stream_info(&name).await {
                Ok(info) => {
                    reads_ok += 1;
                    snap.streams.push(StreamStats {
                        name,
                        length: info.length,
                        latest_entry_age_ms: info.latest_entry_age_ms,
                    });
                }
                Err(e) => push_fault(&mut snap, stream_fault_source(&name), e),
            }
        }

        let mut seen = HashSet::new();
        for stream in policy.pools.iter().map(|p| p.stream.as_str()) {
            if !seen.insert(stream) {
                continue;
            }
            match self.source.consumer_groups(stream).await {
                Ok(groups) => {
                    reads_ok += 1;
                    snap.groups.extend(groups.into_iter().map(|g| GroupStats {
                        stream: stream.to_string(),
                        group_name: g.group_name,
                        pending_count: g.pending_count,
                    }));
                }
                Err(e) => push_fault(&mut snap, format!("groups:{stream}"), e),
            }
        }

        for pool in &policy.pools {
            match self.source.consumers(&pool.stream, &pool.group).await {
                Ok(consumers) => {
                    reads_ok += 1;
                    snap.consumers.extend(consumers.into_iter().map(|c| ConsumerStats {
                        stream: pool.stream.clone(),
                        group: pool.group.clone(),
                        consumer_id: c.consumer_id,
                        idle_ms: c.idle_ms,
                        pending_count: c.pending_count,
                    }));
                }
                Err(e) => {
                    let source = consumer_fault_source(&pool.stream, &pool.group);
                    push_fault(&mut snap, source, e)
                }
            }
        }

        match self.source.host_metrics().await {
            Ok(host) => {
                reads_ok += 1;
                snap.host = Some(host);
            }
            Err(e) => push_fault(&mut snap, "host".to_string(), e),
        }

        let metrics_stream = &policy.metrics.metrics_stream;
        let sample_size = policy.metrics.perf_sample_size as usize;
        match self.source.recent_entry_ages(metrics_stream, sample_size).await {
            Ok(ages) => {
                reads_ok += 1;
                snap.perf_sample = ages.iter().min().map(|newest| PerfSample {
                    record_count: ages.len() as u64,
                    newest_age_ms: *newest,
                });
            }
            Err(e) => push_fault(&mut snap, format!("sample:{metrics_stream}"), e),
        }

        let window = policy.metrics.downstream_window;
        for stream in &policy.metrics.downstream_streams {
            match self.source.entries_since(stream, window).await {
                Ok(count) => {
                    reads_ok += 1;
                    snap.downstream.push(StreamActivity {
                        stream: stream.clone(),
                        entries_in_window: count,
                        window_ms: window.as_millis() as u64,
                    });
                }
                Err(e) => push_fault(&mut snap, format!("activity:{stream}"), e),
            }
        }

        if reads_ok == 0 {
            return Err(CollectError::TelemetryUnavailable(format!(
                "all {} telemetry reads failed",
                snap.faults.len()
            )));
        }

        debug!(
            streams = snap.streams.len(),
            consumers = snap.consumers.len(),
            faults = snap.faults.len(),
            "metrics snapshot collected"
        );
        Ok(snap)
    }

    /// Collect, falling back to the previous snapshot on failure.
    pub async fn poll(
        &mut self,
        policy: &ControllerPolicy,
    ) -> Result<CollectedSnapshot, CollectError> {
        self.poll_at(policy, epoch_millis()).await
    }

    /// `poll()` with an explicit clock.
    ///
    /// A failed collection reuses the previous snapshot for one cycle. Data
    /// is stale once it has been reused more than once or is older than
    /// twice the poll interval.
    pub async fn poll_at(
        &mut self,
        policy: &ControllerPolicy,
        now_ms: u64,
    ) -> Result<CollectedSnapshot, CollectError> {
        match self.collect_at(policy, now_ms).await {
            Ok(snapshot) => {
                self.consecutive_failures = 0;
                let snapshot = Arc::new(snapshot);
                self.last = Some(Arc::clone(&snapshot));
                Ok(CollectedSnapshot {
                    snapshot,
                    stale: false,
                    reused: false,
                })
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    error = %e,
                    failures = self.consecutive_failures,
                    "metrics collection failed"
                );
                let Some(prev) = &self.last else {
                    return Err(e);
                };
                let max_age_ms = 2 * policy.metrics.poll_interval.as_millis() as u64;
                let stale = self.consecutive_failures > 1 || prev.age_ms(now_ms) > max_age_ms;
                Ok(CollectedSnapshot {
                    snapshot: Arc::clone(prev),
                    stale,
                    reused: true,
                })
            }
        }
    }
}

fn push_fault(snap: &mut MetricsSnapshot, source: String, err: TelemetryError) {
    debug!(%source, error = %err, "telemetry item failed");
    snap.faults.push(TelemetryFault {
        source,
        message: err.to_string(),
    });
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
