//! Parallel-publish outcome statistics
//!
//! Publishers report each fan-out operation here; the control plane derives
//! success rates, latency percentiles, and queue pressure for the trend
//! detector and the stats endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Bound on the retained duration samples; older samples are overwritten
/// circularly once the buffer is full.
pub const MAX_DURATION_SAMPLES: usize = 1000;

/// Outcome of publishing one alert to one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetPublishResult {
    pub target: String,
    pub success: bool,
}

/// Outcome of one parallel publish operation across targets
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub results: Vec<TargetPublishResult>,
    pub duration_ms: u64,
}

impl PublishOutcome {
    pub fn is_full_success(&self) -> bool {
        self.results.iter().all(|result| result.success)
    }

    pub fn is_full_failure(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|result| !result.success)
    }
}

/// Per-target publish counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Derived view returned by [`PublishStats::get_stats`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishStatsSnapshot {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub partial_operations: u64,
    /// Percent of operations that fully succeeded
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub p50_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
    pub sample_count: usize,
    pub queue_depth: u64,
    pub per_target: HashMap<String, TargetCounters>,
}

/// Thread-safe collector of parallel-publish outcomes
#[derive(Default)]
pub struct PublishStats {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    total_operations: u64,
    successful_operations: u64,
    failed_operations: u64,
    partial_operations: u64,
    per_target: HashMap<String, TargetCounters>,
    samples: Vec<f64>,
    next_sample: usize,
    queue_depth: u64,
}

impl PublishStats {
    pub fn new() -> Arc<PublishStats> {
        Arc::new(PublishStats::default())
    }

    /// Record one fan-out operation.
    pub fn record(&self, outcome: &PublishOutcome) {
        let mut inner = self.inner.lock();
        inner.total_operations += 1;
        if outcome.is_full_success() {
            inner.successful_operations += 1;
        } else if outcome.is_full_failure() {
            inner.failed_operations += 1;
        } else {
            inner.partial_operations += 1;
        }

        for result in &outcome.results {
            let counters = inner.per_target.entry(result.target.clone()).or_default();
            counters.attempts += 1;
            if result.success {
                counters.successes += 1;
            } else {
                counters.failures += 1;
            }
        }

        let sample = outcome.duration_ms as f64;
        if inner.samples.len() < MAX_DURATION_SAMPLES {
            inner.samples.push(sample);
        } else {
            let slot = inner.next_sample;
            inner.samples[slot] = sample;
        }
        inner.next_sample = (inner.next_sample + 1) % MAX_DURATION_SAMPLES;
    }

    /// Publishers report current queue depth alongside outcomes.
    pub fn set_queue_depth(&self, depth: u64) {
        self.inner.lock().queue_depth = depth;
    }

    pub fn queue_depth(&self) -> u64 {
        self.inner.lock().queue_depth
    }

    /// Derive aggregate statistics from the current counters and samples.
    pub fn get_stats(&self) -> PublishStatsSnapshot {
        let inner = self.inner.lock();

        let mut sorted = inner.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let avg = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        PublishStatsSnapshot {
            total_operations: inner.total_operations,
            successful_operations: inner.successful_operations,
            failed_operations: inner.failed_operations,
            partial_operations: inner.partial_operations,
            success_rate: if inner.total_operations > 0 {
                100.0 * inner.successful_operations as f64 / inner.total_operations as f64
            } else {
                0.0
            },
            avg_duration_ms: avg,
            min_duration_ms: sorted.first().map(|v| *v as u64),
            max_duration_ms: sorted.last().map(|v| *v as u64),
            p50_duration_ms: percentile(&sorted, 50.0),
            p95_duration_ms: percentile(&sorted, 95.0),
            p99_duration_ms: percentile(&sorted, 99.0),
            sample_count: sorted.len(),
            queue_depth: inner.queue_depth,
            per_target: inner.per_target.clone(),
        }
    }

    /// Clear every counter and sample.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}

/// Linear-interpolated percentile over an already sorted sample slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let fraction = rank - lower as f64;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}
