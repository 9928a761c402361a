//! Health classification for consumers, pools, and the cluster.

use tracing::debug;

use pipescale_core::{
    ClusterHealth, ConsumerHealth, ConsumerStats, HealthState, HealthThresholds, MetricsSnapshot,
    PoolConfig, PoolHealth,
};

/// Pool aggregate plus the per-consumer classifications behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolReport {
    pub health: PoolHealth,
    pub consumers: Vec<ConsumerHealth>,
}

/// Bucket one consumer by its idle duration.
///
/// A value exactly on a boundary belongs to the less healthy bucket.
pub fn classify_consumer(
    consumer: &ConsumerStats,
    thresholds: &HealthThresholds,
) -> ConsumerHealth {
    let healthy_below = thresholds.healthy_below.as_millis() as u64;
    let critical_at = thresholds.critical_at.as_millis() as u64;

    let state = if consumer.idle_ms < healthy_below {
        HealthState::Healthy
    } else if consumer.idle_ms < critical_at {
        HealthState::Warning
    } else {
        HealthState::Critical
    };

    ConsumerHealth {
        consumer_id: consumer.consumer_id.clone(),
        group: consumer.group.clone(),
        state,
        idle_ms: consumer.idle_ms,
        pending_count: consumer.pending_count,
    }
}

/// Classify every consumer of one pool and aggregate.
///
/// The backlog is the consumer group's pending count; when the group itself
/// could not be read, the consumers' pending counts are summed instead.
pub fn classify_pool(
    pool: &PoolConfig,
    snapshot: &MetricsSnapshot,
    thresholds: &HealthThresholds,
) -> PoolReport {
    let consumers: Vec<ConsumerHealth> = snapshot
        .consumers_of(&pool.stream, &pool.group)
        .map(|c| classify_consumer(c, thresholds))
        .collect();

    let count = |state: HealthState| consumers.iter().filter(|c| c.state == state).count() as u32;
    let healthy = count(HealthState::Healthy);
    let warning = count(HealthState::Warning);
    let critical = count(HealthState::Critical);
    let total = consumers.len() as u32;

    let pending_backlog = match snapshot.group(&pool.stream, &pool.group) {
        Some(group) => group.pending_count,
        None => consumers.iter().map(|c| c.pending_count).sum(),
    };

    let healthy_ratio = if total == 0 {
        0.0
    } else {
        f64::from(healthy) / f64::from(total)
    };

    debug!(
        pool = %pool.id,
        total,
        healthy,
        warning,
        critical,
        pending_backlog,
        "pool classified"
    );

    PoolReport {
        health: PoolHealth {
            pool_id: pool.id.clone(),
            total,
            healthy,
            warning,
            critical,
            pending_backlog,
            healthy_ratio,
        },
        consumers,
    }
}

/// Mean of the pools' healthy ratios, in percent. 0.0 with no pools.
pub fn cluster_health_percent(pools: &[PoolHealth]) -> f64 {
    if pools.is_empty() {
        return 0.0;
    }
    let sum: f64 = pools.iter().map(|p| p.healthy_ratio).sum();
    100.0 * sum / pools.len() as f64
}

/// Classify every configured pool.
pub fn classify_cluster(
    pools: &[PoolConfig],
    snapshot: &MetricsSnapshot,
    thresholds: &HealthThresholds,
) -> ClusterHealth {
    let pools: Vec<PoolHealth> = pools
        .iter()
        .map(|p| classify_pool(p, snapshot, thresholds).health)
        .collect();
    let health_percent = cluster_health_percent(&pools);
    ClusterHealth {
        pools,
        health_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipescale_core::GroupStats;
    use std::time::Duration;

    const MIN: u64 = 60_000;

    fn consumer(group: &str, id: &str, idle_ms: u64) -> ConsumerStats {
        ConsumerStats {
            stream: "sensor_data".to_string(),
            group: group.to_string(),
            consumer_id: id.to_string(),
            idle_ms,
            pending_count: 2,
        }
    }

    fn pool(id: &str, group: &str) -> PoolConfig {
        PoolConfig::new(id, "sensor_data", group)
    }

    fn state_of(idle_ms: u64) -> HealthState {
        classify_consumer(&consumer("g", "c", idle_ms), &HealthThresholds::default()).state
    }

    #[test]
    fn buckets_by_idle_time() {
        assert_eq!(state_of(0), HealthState::Healthy);
        assert_eq!(state_of(5 * MIN - 1), HealthState::Healthy);
        assert_eq!(state_of(10 * MIN), HealthState::Warning);
        assert_eq!(state_of(15 * MIN - 1), HealthState::Warning);
        assert_eq!(state_of(60 * MIN), HealthState::Critical);
    }

    #[test]
    fn boundaries_belong_to_stricter_bucket() {
        assert_eq!(state_of(5 * MIN), HealthState::Warning);
        assert_eq!(state_of(15 * MIN), HealthState::Critical);
    }

    #[test]
    fn custom_thresholds() {
        let thresholds = HealthThresholds {
            healthy_below: Duration::from_secs(30),
            critical_at: Duration::from_secs(60),
        };
        let health = classify_consumer(&consumer("g", "c", 45_000), &thresholds);
        assert_eq!(health.state, HealthState::Warning);
        assert_eq!(health.idle_ms, 45_000);
        assert_eq!(health.pending_count, 2);
    }

    #[test]
    fn five_consumer_pool_scenario() {
        let snap = MetricsSnapshot {
            consumers: [1, 3, 6, 16, 2]
                .iter()
                .enumerate()
                .map(|(i, m)| consumer("bearing_diagnosis", &format!("c{i}"), m * MIN))
                .collect(),
            ..Default::default()
        };

        let report = classify_pool(
            &pool("bearing", "bearing_diagnosis"),
            &snap,
            &HealthThresholds::default(),
        );

        let states: Vec<_> = report.consumers.iter().map(|c| c.state).collect();
        assert_eq!(
            states,
            vec![
                HealthState::Healthy,
                HealthState::Healthy,
                HealthState::Warning,
                HealthState::Critical,
                HealthState::Healthy,
            ]
        );
        assert_eq!(report.health.total, 5);
        assert_eq!(report.health.healthy, 3);
        assert_eq!(report.health.warning, 1);
        assert_eq!(report.health.critical, 1);
        assert!((report.health.healthy_ratio - 0.6).abs() < 1e-12);
    }

    #[test]
    fn backlog_prefers_group_pending_count() {
        let mut snap = MetricsSnapshot {
            consumers: vec![
                consumer("bearing_diagnosis", "a", 0),
                consumer("bearing_diagnosis", "b", 0),
            ],
            ..Default::default()
        };
        let p = pool("bearing", "bearing_diagnosis");
        let thresholds = HealthThresholds::default();

        // No group record: sum of consumer pending counts.
        assert_eq!(classify_pool(&p, &snap, &thresholds).health.pending_backlog, 4);

        snap.groups.push(GroupStats {
            stream: "sensor_data".to_string(),
            group_name: "bearing_diagnosis".to_string(),
            pending_count: 5_000,
        });
        assert_eq!(classify_pool(&p, &snap, &thresholds).health.pending_backlog, 5_000);
    }

    #[test]
    fn empty_pool_has_zero_ratio() {
        let report = classify_pool(
            &pool("motor", "motor_diagnosis"),
            &MetricsSnapshot::default(),
            &HealthThresholds::default(),
        );
        assert_eq!(report.health.total, 0);
        assert_eq!(report.health.healthy_ratio, 0.0);
    }

    #[test]
    fn cluster_health_weights_pools_equally() {
        // Pool A: 1 of 1 healthy. Pool B: 1 of 4 healthy.
        let snap = MetricsSnapshot {
            consumers: vec![
                consumer("a", "a1", 0),
                consumer("b", "b1", 0),
                consumer("b", "b2", 20 * MIN),
                consumer("b", "b3", 20 * MIN),
                consumer("b", "b4", 20 * MIN),
            ],
            ..Default::default()
        };
        let cluster = classify_cluster(
            &[pool("a", "a"), pool("b", "b")],
            &snap,
            &HealthThresholds::default(),
        );

        // Mean of 1.0 and 0.25, not 2 of 5.
        assert!((cluster.health_percent - 62.5).abs() < 1e-9);
        assert_eq!(cluster.pools.len(), 2);
    }

    #[test]
    fn cluster_without_pools_is_zero() {
        assert_eq!(cluster_health_percent(&[]), 0.0);
    }

    #[test]
    fn classification_depends_only_on_snapshot() {
        let snap = MetricsSnapshot {
            consumers: vec![consumer("g", "c", 7 * MIN)],
            ..Default::default()
        };
        let p = pool("p", "g");
        let thresholds = HealthThresholds::default();
        assert_eq!(
            classify_pool(&p, &snap, &thresholds),
            classify_pool(&p, &snap, &thresholds)
        );
    }
}
