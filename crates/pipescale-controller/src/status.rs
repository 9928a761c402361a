//! Status board — the latest `StatusReport`, shared with readers.

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use pipescale_core::StatusReport;

/// Shared handle to the most recent cycle's report.
///
/// The controller publishes once per cycle; API layers, the daemon's file
/// exporter and tests read clones. `updates()` wakes a reader on every
/// publish.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusReport>>,
    published: Arc<watch::Sender<u64>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        let (published, _) = watch::channel(0);
        Self {
            inner: Arc::default(),
            published: Arc::new(published),
        }
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current report.
    pub async fn publish(&self, report: StatusReport) {
        let generated_at_ms = report.generated_at_ms;
        *self.inner.write().await = report;
        self.published.send_replace(generated_at_ms);
    }

    /// Clone of the current report.
    pub async fn current(&self) -> StatusReport {
        self.inner.read().await.clone()
    }

    /// Changes to the `generated_at_ms` of the latest publish.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readers_see_latest_publish() {
        let board = StatusBoard::new();
        let reader = board.clone();
        assert_eq!(reader.current().await, StatusReport::default());

        board
            .publish(StatusReport {
                generated_at_ms: 42,
                stale: true,
                ..Default::default()
            })
            .await;

        let seen = reader.current().await;
        assert_eq!(seen.generated_at_ms, 42);
        assert!(seen.stale);
    }

    #[tokio::test]
    async fn publish_wakes_subscribers() {
        let board = StatusBoard::new();
        let mut updates = board.updates();
        assert!(!updates.has_changed().unwrap());

        board
            .publish(StatusReport {
                generated_at_ms: 7,
                ..Default::default()
            })
            .await;

        updates.changed().await.unwrap();
        assert_eq!(*updates.borrow_and_update(), 7);
    }
}
