//! Prometheus text exposition format.
//!
//! Renders the controller's `StatusReport` into the Prometheus text
//! exposition format, for a textfile collector or a scrape endpoint owned
//! by the API layer.

use std::fmt::Write;

use pipescale_core::{HealthState, StatusReport};

/// Render a status report into Prometheus text format.
///
/// Cluster-wide values are unlabelled gauges; per-pool values carry a
/// `pool` label.
pub fn render_prometheus(report: &StatusReport) -> String {
    let mut out = String::new();

    gauge_header(
        &mut out,
        "pipescale_throughput_msgs_per_second",
        "Estimated pipeline throughput in messages per second.",
    );
    if let Some(t) = &report.throughput {
        let _ = writeln!(out, "pipescale_throughput_msgs_per_second {:.4}", t.value_msgs_per_sec);
    }

    gauge_header(
        &mut out,
        "pipescale_throughput_method",
        "Estimation tier used for throughput (1-3).",
    );
    if let Some(t) = &report.throughput {
        let _ = writeln!(out, "pipescale_throughput_method {}", t.method_used.tier());
    }

    gauge_header(
        &mut out,
        "pipescale_throughput_confidence",
        "Confidence in the throughput estimate (0.0-1.0).",
    );
    if let Some(t) = &report.throughput {
        let _ = writeln!(out, "pipescale_throughput_confidence {:.4}", t.confidence);
    }

    gauge_header(
        &mut out,
        "pipescale_cluster_health_percent",
        "Mean healthy-consumer ratio across pools, in percent.",
    );
    let _ = writeln!(
        out,
        "pipescale_cluster_health_percent {:.2}",
        report.cluster.health_percent
    );

    gauge_header(
        &mut out,
        "pipescale_metrics_stale",
        "1 when the report was built from stale telemetry.",
    );
    let _ = writeln!(out, "pipescale_metrics_stale {}", u8::from(report.stale));

    gauge_header(
        &mut out,
        "pipescale_pool_consumers",
        "Consumers per pool by health state.",
    );
    for pool in &report.cluster.pools {
        for (state, count) in [
            (HealthState::Healthy, pool.healthy),
            (HealthState::Warning, pool.warning),
            (HealthState::Critical, pool.critical),
        ] {
            let _ = writeln!(
                out,
                "pipescale_pool_consumers{{pool=\"{}\",state=\"{}\"}} {}",
                pool.pool_id,
                state.as_str(),
                count
            );
        }
    }

    gauge_header(
        &mut out,
        "pipescale_pool_pending_backlog",
        "Pending (unacknowledged) entries per pool.",
    );
    for pool in &report.cluster.pools {
        let _ = writeln!(
            out,
            "pipescale_pool_pending_backlog{{pool=\"{}\"}} {}",
            pool.pool_id, pool.pending_backlog
        );
    }

    gauge_header(
        &mut out,
        "pipescale_pool_healthy_ratio",
        "Healthy consumers over total consumers per pool.",
    );
    for pool in &report.cluster.pools {
        let _ = writeln!(
            out,
            "pipescale_pool_healthy_ratio{{pool=\"{}\"}} {:.4}",
            pool.pool_id, pool.healthy_ratio
        );
    }

    gauge_header(
        &mut out,
        "pipescale_pool_target_consumers",
        "Consumer count requested by the last scaling decision.",
    );
    for d in &report.decisions {
        let _ = writeln!(
            out,
            "pipescale_pool_target_consumers{{pool=\"{}\",action=\"{}\"}} {}",
            d.pool_id,
            d.action.as_str(),
            d.target_count
        );
    }

    gauge_header(
        &mut out,
        "pipescale_pool_load_score",
        "Composite load score of the last evaluation (0.0-1.0).",
    );
    for d in &report.decisions {
        if let Some(score) = d.load_score {
            let _ = writeln!(
                out,
                "pipescale_pool_load_score{{pool=\"{}\"}} {:.4}",
                d.pool_id, score
            );
        }
    }

    out
}

fn gauge_header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}
