//! Aggregate health statistics for the status boundary

use serde::Serialize;

use alertroute_common::{HealthState, TargetHealthStatus};

use crate::cache::HealthStatusCache;

/// Fleet-wide health rollup derived from the status cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub enabled: usize,
    /// Mean latency over targets currently reporting one
    pub avg_latency_ms: Option<f64>,
    /// Success rate over all checks ever applied, percent
    pub overall_success_rate: f64,
    pub total_checks: u64,
}

impl HealthSummary {
    pub fn from_statuses(statuses: &[TargetHealthStatus]) -> HealthSummary {
        let mut summary = HealthSummary {
            total: statuses.len(),
            ..HealthSummary::default()
        };

        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;
        let mut successes = 0u64;

        for status in statuses {
            match status.status {
                HealthState::Healthy => summary.healthy += 1,
                HealthState::Degraded => summary.degraded += 1,
                HealthState::Unhealthy => summary.unhealthy += 1,
                HealthState::Unknown => summary.unknown += 1,
            }
            if status.enabled {
                summary.enabled += 1;
            }
            if let Some(latency) = status.latency_ms {
                latency_sum += latency;
                latency_count += 1;
            }
            summary.total_checks += status.total_checks;
            successes += status.total_successes;
        }

        if latency_count > 0 {
            summary.avg_latency_ms = Some(latency_sum as f64 / latency_count as f64);
        }
        summary.overall_success_rate = if summary.total_checks > 0 {
            100.0 * successes as f64 / summary.total_checks as f64
        } else {
            0.0
        };
        summary
    }

    pub fn from_cache(cache: &HealthStatusCache) -> HealthSummary {
        HealthSummary::from_statuses(&cache.get_all())
    }
}
