//! Telemetry read from a JSON file that an exporter rewrites periodically.
//!
//! The file holds a `TelemetryDocument`. It is re-read on every `refresh()`;
//! a missing or malformed file makes the whole cycle unavailable so the
//! collector falls back to its reuse/stale handling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use pipescale_core::HostStats;
use pipescale_metrics::{
    ConsumerInfo, GroupInfo, StaticTelemetry, StreamInfo, TelemetryDocument, TelemetryError,
    TelemetryResult, TelemetrySource,
};

pub struct FileTelemetry {
    path: PathBuf,
    inner: StaticTelemetry,
}

impl FileTelemetry {
    pub fn new(path: &Path) -> Self {
        let inner = StaticTelemetry::default();
        inner.set_available(false);
        Self {
            path: path.to_path_buf(),
            inner,
        }
    }

    async fn load(&self) -> TelemetryResult<TelemetryDocument> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            TelemetryError::Unavailable(format!("read {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            TelemetryError::Unavailable(format!("parse {}: {e}", self.path.display()))
        })
    }
}

impl TelemetrySource for FileTelemetry {
    async fn refresh(&self) -> TelemetryResult<()> {
        match self.load().await {
            Ok(doc) => {
                debug!(
                    path = %self.path.display(),
                    streams = doc.streams.len(),
                    "telemetry file loaded"
                );
                self.inner.set_document(doc);
                self.inner.set_available(true);
                Ok(())
            }
            Err(e) => {
                self.inner.set_available(false);
                Err(e)
            }
        }
    }

    async fn stream_info(&self, stream: &str) -> TelemetryResult<StreamInfo> {
        self.inner.stream_info(stream).await
    }

    async fn consumer_groups(&self, stream: &str) -> TelemetryResult<Vec<GroupInfo>> {
        self.inner.consumer_groups(stream).await
    }

    async fn consumers(&self, stream: &str, group: &str) -> TelemetryResult<Vec<ConsumerInfo>> {
        self.inner.consumers(stream, group).await
    }

    async fn host_metrics(&self) -> TelemetryResult<HostStats> {
        self.inner.host_metrics().await
    }

    async fn recent_entry_ages(&self, stream: &str, count: usize) -> TelemetryResult<Vec<u64>> {
        self.inner.recent_entry_ages(stream, count).await
    }

    async fn entries_since(&self, stream: &str, window: Duration) -> TelemetryResult<u64> {
        self.inner.entries_since(stream, window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "streams": [{
            "name": "sensor_data",
            "length": 1200,
            "latest_entry_age_ms": 80,
            "groups": [{
                "name": "bearing_diagnosis",
                "pending_count": 12,
                "consumers": [{"consumer_id": "b-1", "idle_ms": 900, "pending_count": 12}]
            }]
        }],
        "host": {"cpu_percent": 41.5, "memory_percent": 63.0}
    }"#;

    #[tokio::test]
    async fn serves_file_contents_after_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        std::fs::write(&path, DOC).unwrap();
        let source = FileTelemetry::new(&path);

        source.refresh().await.unwrap();

        let info = source.stream_info("sensor_data").await.unwrap();
        assert_eq!(info.length, 1200);
        let consumers = source.consumers("sensor_data", "bearing_diagnosis").await.unwrap();
        assert_eq!(consumers[0].idle_ms, 900);
        assert_eq!(source.host_metrics().await.unwrap().cpu_percent, 41.5);
    }

    #[tokio::test]
    async fn picks_up_rewritten_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        std::fs::write(&path, DOC).unwrap();
        let source = FileTelemetry::new(&path);
        source.refresh().await.unwrap();

        std::fs::write(&path, DOC.replace("1200", "1500")).unwrap();
        source.refresh().await.unwrap();

        assert_eq!(source.stream_info("sensor_data").await.unwrap().length, 1500);
    }

    #[tokio::test]
    async fn malformed_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        std::fs::write(&path, DOC).unwrap();
        let source = FileTelemetry::new(&path);
        source.refresh().await.unwrap();

        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            source.refresh().await,
            Err(TelemetryError::Unavailable(_))
        ));
        // Nothing is served from the previous document either.
        assert!(source.stream_info("sensor_data").await.is_err());
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileTelemetry::new(&dir.path().join("absent.json"));
        assert!(source.refresh().await.is_err());
    }
}
