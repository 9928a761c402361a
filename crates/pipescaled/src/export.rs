//! Status file export.
//!
//! Writes the latest `StatusReport` as JSON to the configured path and as
//! Prometheus text next to it (`<path>.prom`), for a node-exporter textfile
//! collector. Files are replaced atomically via rename.

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use pipescale_controller::StatusBoard;
use pipescale_core::StatusReport;
use pipescale_metrics::render_prometheus;

/// Path of the Prometheus text file that accompanies `json_path`.
pub fn prometheus_path(json_path: &Path) -> PathBuf {
    let mut name = json_path.as_os_str().to_owned();
    name.push(".prom");
    PathBuf::from(name)
}

/// Write both status files once.
pub async fn write_status(json_path: &Path, report: &StatusReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    write_atomic(json_path, json.as_bytes()).await?;
    write_atomic(&prometheus_path(json_path), render_prometheus(report).as_bytes()).await?;
    Ok(())
}

async fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Export every report published on `board` until shutdown.
///
/// A report published before the exporter started is written right away.
pub async fn run_exporter(
    board: StatusBoard,
    json_path: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(path = %json_path.display(), "status exporter started");
    let mut updates = board.updates();
    updates.mark_changed();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    debug!("status board dropped");
                    break;
                }
                let report = board.current().await;
                if report.generated_at_ms == 0 {
                    continue;
                }
                match write_status(&json_path, &report).await {
                    Ok(()) => {
                        debug!(generated_at_ms = report.generated_at_ms, "status files written")
                    }
                    Err(e) => warn!(
                        path = %json_path.display(),
                        error = %e,
                        "failed to write status files"
                    ),
                }
            }
            _ = shutdown.changed() => {
                info!("status exporter shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pipescale_core::ClusterHealth;

    #[test]
    fn prometheus_file_sits_next_to_json() {
        assert_eq!(
            prometheus_path(Path::new("/var/lib/pipescale/status.json")),
            PathBuf::from("/var/lib/pipescale/status.json.prom")
        );
    }

    #[tokio::test]
    async fn writes_json_and_prometheus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let report = StatusReport {
            generated_at_ms: 7,
            cluster: ClusterHealth {
                pools: vec![],
                health_percent: 80.0,
            },
            ..Default::default()
        };

        write_status(&path, &report).await.unwrap();

        let json: StatusReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json, report);
        let prom = std::fs::read_to_string(prometheus_path(&path)).unwrap();
        assert!(prom.contains("pipescale_cluster_health_percent 80.00"));
    }

    #[tokio::test]
    async fn exporter_writes_each_published_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let board = StatusBoard::new();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_exporter(board.clone(), path.clone(), rx));

        for generated_at_ms in [99, 100] {
            board
                .publish(StatusReport {
                    generated_at_ms,
                    ..Default::default()
                })
                .await;
            let written = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if let Ok(raw) = std::fs::read_to_string(&path)
                        && let Ok(json) = serde_json::from_str::<StatusReport>(&raw)
                        && json.generated_at_ms == generated_at_ms
                    {
                        return json;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
            assert_eq!(written.generated_at_ms, generated_at_ms);
        }

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
