//! Built-in collectors over the control-plane subsystems

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use alertroute_common::{RefreshState, Result, TargetType};
use alertroute_discovery::{DiscoveryEngine, RefreshOrchestrator};
use alertroute_health::HealthStatusCache;

use crate::collector::MetricCollector;
use crate::publish::PublishStats;

/// Stable metric key literals. The trend detector and tests depend on these.
pub mod keys {
    pub const TARGETS_TOTAL: &str = "targets_total";
    pub const TARGETS_VALID: &str = "targets_valid";
    pub const TARGETS_INVALID: &str = "targets_invalid";
    pub const TARGETS_ENABLED: &str = "targets_enabled";
    pub const TARGETS_DISABLED: &str = "targets_disabled";
    pub const DISCOVERY_ERRORS_TOTAL: &str = "discovery_errors_total";
    pub const LAST_DISCOVERY_TIMESTAMP: &str = "last_discovery_timestamp";
    pub const LAST_DISCOVERY_AGE_SECONDS: &str = "last_discovery_age_seconds";

    pub const REFRESH_IN_PROGRESS: &str = "refresh_in_progress";
    pub const REFRESH_CONSECUTIVE_FAILURES: &str = "refresh_consecutive_failures";
    pub const REFRESH_LAST_SUCCESS_TIMESTAMP: &str = "refresh_last_success_timestamp";
    pub const REFRESH_LAST_DURATION_MS: &str = "refresh_last_duration_ms";

    pub const HEALTH_TARGETS_HEALTHY: &str = "health_targets_healthy";
    pub const HEALTH_TARGETS_DEGRADED: &str = "health_targets_degraded";
    pub const HEALTH_TARGETS_UNHEALTHY: &str = "health_targets_unhealthy";
    pub const HEALTH_TARGETS_UNKNOWN: &str = "health_targets_unknown";
    pub const HEALTH_SUCCESS_RATE: &str = "health_success_rate";
    pub const HEALTH_AVG_LATENCY_MS: &str = "health_avg_latency_ms";

    pub const PUBLISH_TOTAL: &str = "publish_total";
    pub const PUBLISH_SUCCESS_RATE: &str = "publish_success_rate";
    pub const PUBLISH_ERROR_RATE: &str = "publish_error_rate";
    pub const PUBLISH_AVG_LATENCY_MS: &str = "publish_avg_latency_ms";
    pub const PUBLISH_P95_LATENCY_MS: &str = "publish_p95_latency_ms";
    pub const PUBLISH_QUEUE_SIZE: &str = "publish_queue_size";
}

/// Registry and discovery statistics
pub struct TargetInventoryCollector {
    engine: Arc<DiscoveryEngine>,
}

impl TargetInventoryCollector {
    pub fn new(engine: Arc<DiscoveryEngine>) -> Arc<TargetInventoryCollector> {
        Arc::new(TargetInventoryCollector { engine })
    }
}

#[async_trait]
impl MetricCollector for TargetInventoryCollector {
    fn name(&self) -> &str {
        "targets"
    }

    async fn collect(&self) -> Result<HashMap<String, f64>> {
        let stats = self.engine.stats();
        let registry = self.engine.registry();
        let mut metrics = HashMap::new();

        metrics.insert(keys::TARGETS_TOTAL.to_string(), stats.total_records as f64);
        metrics.insert(keys::TARGETS_VALID.to_string(), stats.valid_count as f64);
        metrics.insert(keys::TARGETS_INVALID.to_string(), stats.invalid_count as f64);
        metrics.insert(
            keys::DISCOVERY_ERRORS_TOTAL.to_string(),
            stats.cumulative_error_count as f64,
        );
        if let Some(last) = stats.last_success_at {
            metrics.insert(
                keys::LAST_DISCOVERY_TIMESTAMP.to_string(),
                last.timestamp() as f64,
            );
            let age = (Utc::now() - last).num_seconds().max(0);
            metrics.insert(keys::LAST_DISCOVERY_AGE_SECONDS.to_string(), age as f64);
        }

        let enabled = registry.enabled_count();
        metrics.insert(keys::TARGETS_ENABLED.to_string(), enabled as f64);
        metrics.insert(
            keys::TARGETS_DISABLED.to_string(),
            (registry.len() - enabled) as f64,
        );
        for target_type in TargetType::ALL {
            metrics.insert(
                format!("targets_by_type_{target_type}"),
                registry.filter_by_type(target_type).len() as f64,
            );
        }

        Ok(metrics)
    }
}

/// Refresh orchestrator status
pub struct RefreshStatusCollector {
    orchestrator: Arc<RefreshOrchestrator>,
}

impl RefreshStatusCollector {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>) -> Arc<RefreshStatusCollector> {
        Arc::new(RefreshStatusCollector { orchestrator })
    }
}

#[async_trait]
impl MetricCollector for RefreshStatusCollector {
    fn name(&self) -> &str {
        "refresh"
    }

    fn is_available(&self) -> bool {
        self.orchestrator.is_running()
    }

    async fn collect(&self) -> Result<HashMap<String, f64>> {
        let status = self.orchestrator.status();
        let mut metrics = HashMap::new();

        metrics.insert(
            keys::REFRESH_IN_PROGRESS.to_string(),
            if status.state == RefreshState::InProgress {
                1.0
            } else {
                0.0
            },
        );
        metrics.insert(
            keys::REFRESH_CONSECUTIVE_FAILURES.to_string(),
            status.consecutive_failures as f64,
        );
        if let Some(last) = status.last_success_at {
            metrics.insert(
                keys::REFRESH_LAST_SUCCESS_TIMESTAMP.to_string(),
                last.timestamp() as f64,
            );
        }
        if let Some(duration) = status.last_duration_ms {
            metrics.insert(keys::REFRESH_LAST_DURATION_MS.to_string(), duration as f64);
        }

        Ok(metrics)
    }
}

/// Health cache rollup plus per-target gauges
pub struct HealthStatusCollector {
    cache: Arc<HealthStatusCache>,
}

impl HealthStatusCollector {
    pub fn new(cache: Arc<HealthStatusCache>) -> Arc<HealthStatusCollector> {
        Arc::new(HealthStatusCollector { cache })
    }
}

#[async_trait]
impl MetricCollector for HealthStatusCollector {
    fn name(&self) -> &str {
        "health"
    }

    async fn collect(&self) -> Result<HashMap<String, f64>> {
        use alertroute_common::HealthState;

        let statuses = self.cache.get_all();
        let mut metrics = HashMap::new();

        let mut counts = [0usize; 4];
        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;
        let mut checks = 0u64;
        let mut successes = 0u64;

        for status in &statuses {
            match status.status {
                HealthState::Healthy => counts[0] += 1,
                HealthState::Degraded => counts[1] += 1,
                HealthState::Unhealthy => counts[2] += 1,
                HealthState::Unknown => counts[3] += 1,
            }
            if let Some(latency) = status.latency_ms {
                latency_sum += latency;
                latency_count += 1;
            }
            checks += status.total_checks;
            successes += status.total_successes;

            metrics.insert(
                format!("target_health_status_{}", status.name),
                status.status.as_gauge(),
            );
            metrics.insert(
                format!("target_success_rate_{}", status.name),
                status.success_rate,
            );
            metrics.insert(
                format!("target_consecutive_failures_{}", status.name),
                status.consecutive_failures as f64,
            );
        }

        metrics.insert(keys::HEALTH_TARGETS_HEALTHY.to_string(), counts[0] as f64);
        metrics.insert(keys::HEALTH_TARGETS_DEGRADED.to_string(), counts[1] as f64);
        metrics.insert(keys::HEALTH_TARGETS_UNHEALTHY.to_string(), counts[2] as f64);
        metrics.insert(keys::HEALTH_TARGETS_UNKNOWN.to_string(), counts[3] as f64);
        metrics.insert(
            keys::HEALTH_SUCCESS_RATE.to_string(),
            if checks > 0 {
                100.0 * successes as f64 / checks as f64
            } else {
                0.0
            },
        );
        if latency_count > 0 {
            metrics.insert(
                keys::HEALTH_AVG_LATENCY_MS.to_string(),
                latency_sum as f64 / latency_count as f64,
            );
        }

        Ok(metrics)
    }
}

/// Parallel-publish statistics and queue pressure
pub struct PublishStatsCollector {
    stats: Arc<PublishStats>,
}

impl PublishStatsCollector {
    pub fn new(stats: Arc<PublishStats>) -> Arc<PublishStatsCollector> {
        Arc::new(PublishStatsCollector { stats })
    }
}

#[async_trait]
impl MetricCollector for PublishStatsCollector {
    fn name(&self) -> &str {
        "publish"
    }

    async fn collect(&self) -> Result<HashMap<String, f64>> {
        let snapshot = self.stats.get_stats();
        let mut metrics = HashMap::new();

        metrics.insert(
            keys::PUBLISH_TOTAL.to_string(),
            snapshot.total_operations as f64,
        );
        metrics.insert(keys::PUBLISH_SUCCESS_RATE.to_string(), snapshot.success_rate);
        metrics.insert(
            keys::PUBLISH_ERROR_RATE.to_string(),
            if snapshot.total_operations > 0 {
                100.0
                    * (snapshot.failed_operations + snapshot.partial_operations) as f64
                    / snapshot.total_operations as f64
            } else {
                0.0
            },
        );
        metrics.insert(
            keys::PUBLISH_AVG_LATENCY_MS.to_string(),
            snapshot.avg_duration_ms,
        );
        metrics.insert(
            keys::PUBLISH_P95_LATENCY_MS.to_string(),
            snapshot.p95_duration_ms,
        );
        metrics.insert(
            keys::PUBLISH_QUEUE_SIZE.to_string(),
            snapshot.queue_depth as f64,
        );

        Ok(metrics)
    }
}
