//! Pluggable metric collectors and the fan-out aggregator

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use alertroute_common::{AggregatorConfig, Result};

/// One subsystem's view of the world, as a flat name→value map.
#[async_trait]
pub trait MetricCollector: Send + Sync {
    /// Stable collector name, used as the error key on failure.
    fn name(&self) -> &str;

    /// Whether the collector's backing subsystem is ready to be read.
    fn is_available(&self) -> bool {
        true
    }

    /// Produce the current metric values.
    async fn collect(&self) -> Result<HashMap<String, f64>>;
}

/// Immutable result of one aggregation pass
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: HashMap<String, f64>,
    pub collection_duration_ms: u64,
    /// Collectors whose `collect` returned successfully within the deadline
    pub available_collectors: Vec<String>,
    /// Collector name → failure message; `"timeout"` when the deadline fired
    pub errors: HashMap<String, String>,
}

impl MetricsSnapshot {
    fn empty() -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            metrics: HashMap::new(),
            collection_duration_ms: 0,
            available_collectors: Vec::new(),
            errors: HashMap::new(),
        }
    }
}

/// Fans reads out over the registered collectors under a deadline.
///
/// A collector failure never fails the snapshot; its name lands in
/// `errors` and the other collectors' metrics are unaffected. Duplicate
/// keys across collectors resolve last-writer-wins in completion order.
pub struct MetricsAggregator {
    collectors: RwLock<Vec<Arc<dyn MetricCollector>>>,
    config: AggregatorConfig,
}

impl MetricsAggregator {
    pub fn new(config: AggregatorConfig) -> Result<Arc<MetricsAggregator>> {
        config.validate()?;
        Ok(Arc::new(MetricsAggregator {
            collectors: RwLock::new(Vec::new()),
            config,
        }))
    }

    pub fn register(&self, collector: Arc<dyn MetricCollector>) {
        debug!(collector = collector.name(), "registering metric collector");
        self.collectors.write().push(collector);
    }

    pub fn collector_names(&self) -> Vec<String> {
        self.collectors
            .read()
            .iter()
            .map(|collector| collector.name().to_string())
            .collect()
    }

    /// One aggregation pass; always returns a snapshot, partial on failure.
    pub async fn collect_all(&self) -> MetricsSnapshot {
        let started = Instant::now();
        let mut snapshot = MetricsSnapshot::empty();

        let collectors: Vec<Arc<dyn MetricCollector>> = self
            .collectors
            .read()
            .iter()
            .filter(|collector| collector.is_available())
            .cloned()
            .collect();

        let mut tasks: JoinSet<(String, Result<HashMap<String, f64>>)> = JoinSet::new();
        for collector in collectors {
            tasks.spawn(async move {
                let name = collector.name().to_string();
                let values = collector.collect().await;
                (name, values)
            });
        }

        let deadline = tokio::time::sleep(self.config.collect_deadline());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok((name, Ok(values)))) => {
                            snapshot.metrics.extend(values);
                            snapshot.available_collectors.push(name);
                        }
                        Some(Ok((name, Err(err)))) => {
                            warn!(collector = %name, error = %err, "metric collector failed");
                            snapshot.errors.insert(name, err.to_string());
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "metric collector task failed");
                        }
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        deadline_ms = self.config.collect_deadline_ms,
                        "metric collection deadline reached, returning partial snapshot"
                    );
                    snapshot
                        .errors
                        .insert("timeout".to_string(), "collection deadline exceeded".to_string());
                    break;
                }
            }
        }

        snapshot.available_collectors.sort();
        snapshot.collection_duration_ms = started.elapsed().as_millis() as u64;
        snapshot
            .metrics
            .insert("collection_duration_ms".to_string(), snapshot.collection_duration_ms as f64);
        snapshot
    }
}
