//! Metric aggregation pipeline for the alertroute control plane
//!
//! Pluggable collectors fan out under a deadline into neutral snapshot
//! maps; a ring buffer retains history; the trend analyzer classifies the
//! publish series and flags anomalies. Exporting to a wire format is a thin
//! adapter on top of the snapshot and lives outside this crate.

pub mod collector;
pub mod collectors;
pub mod publish;
pub mod timeseries;
pub mod trends;

pub use collector::{MetricCollector, MetricsAggregator, MetricsSnapshot};
pub use collectors::{
    keys, HealthStatusCollector, PublishStatsCollector, RefreshStatusCollector,
    TargetInventoryCollector,
};
pub use publish::{
    PublishOutcome, PublishStats, PublishStatsSnapshot, TargetCounters, TargetPublishResult,
    MAX_DURATION_SAMPLES,
};
pub use timeseries::MetricsHistory;
pub use trends::{LatencyTrend, QueueTrend, Trend, TrendAnalyzer, TrendReport};
