//! Telemetry source contract and an in-memory implementation.
//!
//! The pipeline itself (append-only streams, consumer groups) lives outside
//! this controller. `TelemetrySource` is the read-only view the collector
//! needs; every call may fail independently.

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pipescale_core::HostStats;

/// Result type alias for telemetry calls.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors a telemetry call can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("telemetry unavailable: {0}")]
    Unavailable(String),

    #[error("unknown stream: {0}")]
    UnknownStream(String),

    #[error("unknown consumer group {group} on stream {stream}")]
    UnknownGroup { stream: String, group: String },
}

/// Length and head age of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub length: u64,
    pub latest_entry_age_ms: Option<u64>,
}

/// A consumer group and its pending-entry count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_name: String,
    pub pending_count: u64,
}

/// One consumer inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub consumer_id: String,
    pub idle_ms: u64,
    pub pending_count: u64,
}

/// Read-only accessor over the stream pipeline.
pub trait TelemetrySource: Send + Sync {
    /// Called once at the start of every collection. Implementations that
    /// hold a connection or a cached document refresh it here; a failure
    /// aborts the whole cycle.
    fn refresh(&self) -> impl Future<Output = TelemetryResult<()>> + Send {
        async { Ok(()) }
    }

    fn stream_info(&self, stream: &str) -> impl Future<Output = TelemetryResult<StreamInfo>> + Send;

    fn consumer_groups(
        &self,
        stream: &str,
    ) -> impl Future<Output = TelemetryResult<Vec<GroupInfo>>> + Send;

    fn consumers(
        &self,
        stream: &str,
        group: &str,
    ) -> impl Future<Output = TelemetryResult<Vec<ConsumerInfo>>> + Send;

    fn host_metrics(&self) -> impl Future<Output = TelemetryResult<HostStats>> + Send;

    /// Ages of the newest `count` entries, newest first.
    fn recent_entry_ages(
        &self,
        stream: &str,
        count: usize,
    ) -> impl Future<Output = TelemetryResult<Vec<u64>>> + Send;

    /// Number of entries appended within the last `window`.
    fn entries_since(
        &self,
        stream: &str,
        window: Duration,
    ) -> impl Future<Output = TelemetryResult<u64>> + Send;
}

// ── Static source ──────────────────────────────────────────────────

/// Serializable description of the pipeline at one moment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryDocument {
    pub streams: Vec<StreamDocument>,
    pub host: Option<HostStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamDocument {
    pub name: String,
    pub length: u64,
    pub latest_entry_age_ms: Option<u64>,
    /// Ages of the most recent entries, newest first.
    pub recent_entry_ages_ms: Vec<u64>,
    pub groups: Vec<GroupDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupDocument {
    pub name: String,
    pub pending_count: u64,
    pub consumers: Vec<ConsumerInfo>,
}

impl TelemetryDocument {
    fn find_stream(&self, stream: &str) -> TelemetryResult<&StreamDocument> {
        self.streams
            .iter()
            .find(|s| s.name == stream)
            .ok_or_else(|| TelemetryError::UnknownStream(stream.to_string()))
    }
}

/// Serves telemetry from an in-memory `TelemetryDocument`.
///
/// The document can be swapped between cycles, and the whole source can be
/// switched off to simulate an unreachable pipeline.
#[derive(Debug, Default)]
pub struct StaticTelemetry {
    inner: RwLock<StaticInner>,
}

#[derive(Debug, Default)]
struct StaticInner {
    doc: TelemetryDocument,
    unavailable: bool,
    latency: Duration,
}

impl StaticTelemetry {
    pub fn new(doc: TelemetryDocument) -> Self {
        Self {
            inner: RwLock::new(StaticInner {
                doc,
                ..Default::default()
            }),
        }
    }

    /// Replace the served document.
    pub fn set_document(&self, doc: TelemetryDocument) {
        self.write().doc = doc;
    }

    /// Make every call fail with `Unavailable` (or restore it).
    pub fn set_available(&self, available: bool) {
        self.write().unavailable = !available;
    }

    /// Delay applied to `refresh()`, to exercise collection timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.write().latency = latency;
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StaticInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&TelemetryDocument) -> TelemetryResult<T>,
    ) -> TelemetryResult<T> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        if inner.unavailable {
            return Err(TelemetryError::Unavailable("source switched off".to_string()));
        }
        f(&inner.doc)
    }

    fn latency(&self) -> Duration {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).latency
    }
}

impl TelemetrySource for StaticTelemetry {
    async fn refresh(&self) -> TelemetryResult<()> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.read(|_| Ok(()))
    }

    async fn stream_info(&self, stream: &str) -> TelemetryResult<StreamInfo> {
        self.read(|doc| {
            let s = doc.find_stream(stream)?;
            Ok(StreamInfo {
                length: s.length,
                latest_entry_age_ms: s.latest_entry_age_ms,
            })
        })
    }

    async fn consumer_groups(&self, stream: &str) -> TelemetryResult<Vec<GroupInfo>> {
        self.read(|doc| {
            let s = doc.find_stream(stream)?;
            Ok(s.groups
                .iter()
                .map(|g| GroupInfo {
                    group_name: g.name.clone(),
                    pending_count: g.pending_count,
                })
                .collect())
        })
    }

    async fn consumers(&self, stream: &str, group: &str) -> TelemetryResult<Vec<ConsumerInfo>> {
        self.read(|doc| {
            let s = doc.find_stream(stream)?;
            s.groups
                .iter()
                .find(|g| g.name == group)
                .map(|g| g.consumers.clone())
                .ok_or_else(|| TelemetryError::UnknownGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })
        })
    }

    async fn host_metrics(&self) -> TelemetryResult<HostStats> {
        self.read(|doc| {
            doc.host
                .ok_or_else(|| TelemetryError::Unavailable("host metrics not reported".to_string()))
        })
    }

    async fn recent_entry_ages(&self, stream: &str, count: usize) -> TelemetryResult<Vec<u64>> {
        self.read(|doc| {
            let s = doc.find_stream(stream)?;
            Ok(s.recent_entry_ages_ms.iter().take(count).copied().collect())
        })
    }

    async fn entries_since(&self, stream: &str, window: Duration) -> TelemetryResult<u64> {
        let window_ms = window.as_millis() as u64;
        self.read(|doc| {
            let s = doc.find_stream(stream)?;
            Ok(s.recent_entry_ages_ms
                .iter()
                .filter(|age| **age < window_ms)
                .count() as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> TelemetryDocument {
        TelemetryDocument {
            streams: vec![StreamDocument {
                name: "diagnosis_results".to_string(),
                length: 120,
                latest_entry_age_ms: Some(2_000),
                recent_entry_ages_ms: vec![2_000, 60_000, 300_000, 900_000],
                groups: vec![GroupDocument {
                    name: "aggregator".to_string(),
                    pending_count: 4,
                    consumers: vec![ConsumerInfo {
                        consumer_id: "agg-1".to_string(),
                        idle_ms: 1_000,
                        pending_count: 4,
                    }],
                }],
            }],
            host: None,
        }
    }

    #[tokio::test]
    async fn serves_document_values() {
        let source = StaticTelemetry::new(doc());

        let info = source.stream_info("diagnosis_results").await.unwrap();
        assert_eq!(info.length, 120);
        assert_eq!(info.latest_entry_age_ms, Some(2_000));

        let groups = source.consumer_groups("diagnosis_results").await.unwrap();
        assert_eq!(groups[0].pending_count, 4);

        let consumers = source.consumers("diagnosis_results", "aggregator").await.unwrap();
        assert_eq!(consumers.len(), 1);

        let ages = source.recent_entry_ages("diagnosis_results", 2).await.unwrap();
        assert_eq!(ages, vec![2_000, 60_000]);
    }

    #[tokio::test]
    async fn entries_since_counts_inside_window() {
        let source = StaticTelemetry::new(doc());
        let count = source
            .entries_since("diagnosis_results", Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn unknown_stream_and_group() {
        let source = StaticTelemetry::new(doc());
        assert_eq!(
            source.stream_info("missing").await,
            Err(TelemetryError::UnknownStream("missing".to_string()))
        );
        assert!(matches!(
            source.consumers("diagnosis_results", "nope").await,
            Err(TelemetryError::UnknownGroup { .. })
        ));
    }

    #[tokio::test]
    async fn missing_host_metrics_is_unavailable() {
        let source = StaticTelemetry::new(doc());
        assert!(matches!(
            source.host_metrics().await,
            Err(TelemetryError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn switched_off_source_fails_every_call() {
        let source = StaticTelemetry::new(doc());
        source.set_available(false);
        assert!(source.refresh().await.is_err());
        assert!(source.stream_info("diagnosis_results").await.is_err());

        source.set_available(true);
        assert!(source.refresh().await.is_ok());
    }
}
