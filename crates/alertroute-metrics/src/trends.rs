//! Trend classification and anomaly detection over the metric history

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use alertroute_common::{Result, TrendConfig};

use crate::collector::MetricsSnapshot;
use crate::collectors::keys;
use crate::timeseries::MetricsHistory;

/// Width of the window compared against the baseline, in minutes.
const RECENT_WINDOW_MINUTES: i64 = 60;

/// Direction of a rate-style series (higher = more)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Direction of a latency series (lower is better)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyTrend {
    Improving,
    Degrading,
    Stable,
}

/// Direction of the queue-depth series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueTrend {
    Growing,
    Shrinking,
    Stable,
}

/// Result of one analysis pass
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub success_rate: Trend,
    pub error_rate: Trend,
    pub latency: LatencyTrend,
    pub queue_size: QueueTrend,
    pub error_spike_detected: bool,
    /// Queue entries gained (or lost) per minute over the recent window
    pub queue_growth_per_minute: f64,
    pub recent_samples: usize,
    pub baseline_samples: usize,
    pub analyzed_at: DateTime<Utc>,
}

impl TrendReport {
    fn stable(recent: usize, baseline: usize) -> TrendReport {
        TrendReport {
            success_rate: Trend::Stable,
            error_rate: Trend::Stable,
            latency: LatencyTrend::Stable,
            queue_size: QueueTrend::Stable,
            error_spike_detected: false,
            queue_growth_per_minute: 0.0,
            recent_samples: recent,
            baseline_samples: baseline,
            analyzed_at: Utc::now(),
        }
    }
}

/// Compares the recent window against the long baseline and flags
/// deviations beyond the configured sigma threshold.
pub struct TrendAnalyzer {
    history: Arc<MetricsHistory>,
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new(history: Arc<MetricsHistory>, config: TrendConfig) -> Result<TrendAnalyzer> {
        config.validate()?;
        Ok(TrendAnalyzer { history, config })
    }

    /// Classify the four core series and run spike detection.
    pub fn analyze(&self) -> TrendReport {
        let now = Utc::now();
        let recent = self
            .history
            .get_range(now - ChronoDuration::minutes(RECENT_WINDOW_MINUTES), now);
        let baseline_window = ChronoDuration::from_std(self.config.history_retention())
            .unwrap_or_else(|_| ChronoDuration::hours(24));
        let baseline = self.history.get_range(now - baseline_window, now);

        if recent.is_empty() || baseline.is_empty() {
            debug!(
                recent = recent.len(),
                baseline = baseline.len(),
                "not enough history for trend analysis"
            );
            return TrendReport::stable(recent.len(), baseline.len());
        }

        let threshold = self.config.trend_threshold_pct;

        let success_delta = delta(&recent, &baseline, keys::PUBLISH_SUCCESS_RATE);
        let success_rate = match success_delta {
            Some(delta) if delta > threshold => Trend::Increasing,
            Some(delta) if delta < -threshold => Trend::Decreasing,
            _ => Trend::Stable,
        };

        let error_delta = delta(&recent, &baseline, keys::PUBLISH_ERROR_RATE);
        let error_rate = match error_delta {
            Some(delta) if delta > threshold => Trend::Increasing,
            Some(delta) if delta < -threshold => Trend::Decreasing,
            _ => Trend::Stable,
        };

        let latency_delta = delta(&recent, &baseline, keys::PUBLISH_AVG_LATENCY_MS);
        let latency = match latency_delta {
            Some(delta) if delta < -threshold => LatencyTrend::Improving,
            Some(delta) if delta > threshold => LatencyTrend::Degrading,
            _ => LatencyTrend::Stable,
        };

        let queue_delta = delta(&recent, &baseline, keys::PUBLISH_QUEUE_SIZE);
        let queue_size = match queue_delta {
            Some(delta) if delta > threshold => QueueTrend::Growing,
            Some(delta) if delta < -threshold => QueueTrend::Shrinking,
            _ => QueueTrend::Stable,
        };

        let error_spike_detected = self.detect_error_spike(&recent, &baseline);
        if error_spike_detected {
            warn!("error-rate spike detected against baseline");
        }

        TrendReport {
            success_rate,
            error_rate,
            latency,
            queue_size,
            error_spike_detected,
            queue_growth_per_minute: queue_growth(&recent),
            recent_samples: recent.len(),
            baseline_samples: baseline.len(),
            analyzed_at: now,
        }
    }

    /// Exponential moving average of one series over the retained history.
    pub fn smoothed(&self, key: &str) -> Option<f64> {
        let alpha = self.config.ema_alpha;
        let mut ema: Option<f64> = None;
        for snapshot in self.history.get_all() {
            if let Some(value) = snapshot.metrics.get(key) {
                ema = Some(match ema {
                    Some(previous) => alpha * value + (1.0 - alpha) * previous,
                    None => *value,
                });
            }
        }
        ema
    }

    /// Spike when the recent mean deviates from the baseline mean by more
    /// than `anomaly_threshold` baseline standard deviations. A flat
    /// baseline (sigma zero) never spikes.
    fn detect_error_spike(&self, recent: &[MetricsSnapshot], baseline: &[MetricsSnapshot]) -> bool {
        let baseline_values = series(baseline, keys::PUBLISH_ERROR_RATE);
        let recent_mean = match mean(&series(recent, keys::PUBLISH_ERROR_RATE)) {
            Some(mean) => mean,
            None => return false,
        };
        let baseline_mean = match mean(&baseline_values) {
            Some(mean) => mean,
            None => return false,
        };

        let variance = baseline_values
            .iter()
            .map(|value| (value - baseline_mean).powi(2))
            .sum::<f64>()
            / baseline_values.len() as f64;
        let sigma = variance.sqrt();
        if sigma == 0.0 {
            return false;
        }

        (recent_mean - baseline_mean).abs() > self.config.anomaly_threshold * sigma
    }
}

fn series(snapshots: &[MetricsSnapshot], key: &str) -> Vec<f64> {
    snapshots
        .iter()
        .filter_map(|snapshot| snapshot.metrics.get(key).copied())
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Recent-average minus baseline-average for one series.
fn delta(recent: &[MetricsSnapshot], baseline: &[MetricsSnapshot], key: &str) -> Option<f64> {
    Some(mean(&series(recent, key))? - mean(&series(baseline, key))?)
}

/// Queue entries gained per minute between the first and last recent
/// samples carrying the queue series.
fn queue_growth(recent: &[MetricsSnapshot]) -> f64 {
    let carrying: Vec<&MetricsSnapshot> = recent
        .iter()
        .filter(|snapshot| snapshot.metrics.contains_key(keys::PUBLISH_QUEUE_SIZE))
        .collect();
    let (first, last) = match (carrying.first(), carrying.last()) {
        (Some(first), Some(last)) if !std::ptr::eq(*first, *last) => (*first, *last),
        _ => return 0.0,
    };

    let minutes = (last.timestamp - first.timestamp).num_seconds() as f64 / 60.0;
    if minutes <= 0.0 {
        return 0.0;
    }
    let first_depth = first.metrics[keys::PUBLISH_QUEUE_SIZE];
    let last_depth = last.metrics[keys::PUBLISH_QUEUE_SIZE];
    (last_depth - first_depth) / minutes
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertroute_common::TimeSeriesConfig;
    use std::collections::HashMap;

    fn snapshot(
        minutes_ago: i64,
        success: f64,
        error: f64,
        latency: f64,
        queue: f64,
    ) -> MetricsSnapshot {
        let mut metrics = HashMap::new();
        metrics.insert(keys::PUBLISH_SUCCESS_RATE.to_string(), success);
        metrics.insert(keys::PUBLISH_ERROR_RATE.to_string(), error);
        metrics.insert(keys::PUBLISH_AVG_LATENCY_MS.to_string(), latency);
        metrics.insert(keys::PUBLISH_QUEUE_SIZE.to_string(), queue);
        MetricsSnapshot {
            timestamp: Utc::now() - ChronoDuration::minutes(minutes_ago),
            metrics,
            collection_duration_ms: 1,
            available_collectors: Vec::new(),
            errors: HashMap::new(),
        }
    }

    fn analyzer_with(snapshots: Vec<MetricsSnapshot>) -> TrendAnalyzer {
        let history = MetricsHistory::new(&TimeSeriesConfig {
            retention_minutes: 24 * 60,
        })
        .unwrap();
        for snap in snapshots {
            history.record(snap);
        }
        TrendAnalyzer::new(history, TrendConfig::default()).unwrap()
    }

    #[test]
    fn empty_history_is_all_stable() {
        let analyzer = analyzer_with(Vec::new());
        let report = analyzer.analyze();
        assert_eq!(report.success_rate, Trend::Stable);
        assert_eq!(report.latency, LatencyTrend::Stable);
        assert_eq!(report.queue_size, QueueTrend::Stable);
        assert!(!report.error_spike_detected);
        assert_eq!(report.queue_growth_per_minute, 0.0);
    }

    #[test]
    fn degrading_latency_and_falling_success() {
        // long healthy baseline, then a short slow-and-failing recent window;
        // the baseline window includes the recent samples, so the bulk of
        // history has to dominate it
        let mut snaps = Vec::new();
        for hour in 2..22i64 {
            snaps.push(snapshot(hour * 60, 99.0, 1.0, 100.0, 5.0));
        }
        snaps.push(snapshot(10, 80.0, 20.0, 400.0, 5.0));
        snaps.push(snapshot(5, 80.0, 20.0, 400.0, 5.0));
        let report = analyzer_with(snaps).analyze();
        assert_eq!(report.success_rate, Trend::Decreasing);
        assert_eq!(report.error_rate, Trend::Increasing);
        assert_eq!(report.latency, LatencyTrend::Degrading);
        assert_eq!(report.queue_size, QueueTrend::Stable);
    }

    #[test]
    fn improving_latency() {
        let mut snaps = Vec::new();
        for hour in 2..6i64 {
            snaps.push(snapshot(hour * 60, 99.0, 1.0, 500.0, 5.0));
        }
        for minute in 0..10i64 {
            snaps.push(snapshot(minute, 99.0, 1.0, 100.0, 5.0));
        }
        let report = analyzer_with(snaps).analyze();
        assert_eq!(report.latency, LatencyTrend::Improving);
        assert_eq!(report.success_rate, Trend::Stable);
    }

    #[test]
    fn error_spike_detection() {
        // a long quiet baseline keeps sigma small even though the baseline
        // window also contains the spike sample
        let mut snaps = Vec::new();
        for minutes_ago in (120..600i64).step_by(15) {
            snaps.push(snapshot(minutes_ago, 99.0, 2.0, 100.0, 5.0));
        }
        snaps.push(snapshot(1, 99.0, 60.0, 100.0, 5.0));
        let report = analyzer_with(snaps).analyze();
        assert!(report.error_spike_detected);
    }

    #[test]
    fn flat_history_never_spikes() {
        let flat: Vec<MetricsSnapshot> = (0..10i64)
            .map(|minute| snapshot(minute * 30, 99.0, 2.0, 100.0, 5.0))
            .collect();
        let report = analyzer_with(flat).analyze();
        assert!(!report.error_spike_detected);
        assert_eq!(report.error_rate, Trend::Stable);
    }

    #[test]
    fn queue_growth_rate() {
        let mut snaps = Vec::new();
        for hour in 2..6i64 {
            snaps.push(snapshot(hour * 60, 99.0, 1.0, 100.0, 10.0));
        }
        // queue rising from 10 to 40 over the last 30 minutes
        snaps.push(snapshot(30, 99.0, 1.0, 100.0, 10.0));
        snaps.push(snapshot(15, 99.0, 1.0, 100.0, 25.0));
        snaps.push(snapshot(0, 99.0, 1.0, 100.0, 40.0));
        let report = analyzer_with(snaps).analyze();
        assert_eq!(report.queue_size, QueueTrend::Growing);
        assert!((report.queue_growth_per_minute - 1.0).abs() < 0.05);
    }

    #[test]
    fn smoothed_follows_latest_values() {
        let snaps: Vec<MetricsSnapshot> = (0..5i64)
            .rev()
            .map(|minute| snapshot(minute, 90.0 + minute as f64, 1.0, 100.0, 5.0))
            .collect();
        let analyzer = analyzer_with(snaps);
        let ema = analyzer.smoothed(keys::PUBLISH_SUCCESS_RATE).unwrap();
        assert!(ema > 90.0 && ema < 95.0);
        assert!(analyzer.smoothed("missing_key").is_none());
    }
}
