//! Control-plane assembly
//!
//! Wires the store, discovery, refresh, health, and metrics subsystems into
//! one component the boundary layer (REST handlers, exporters) talks to.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use alertroute_common::{
    CheckTrigger, ControlPlaneConfig, DiscoveryStats, Error, RefreshStatus, Result,
    TargetHealthStatus,
};
use alertroute_discovery::{ConfigStore, DiscoveryEngine, RefreshOrchestrator, TargetRegistry};
use alertroute_health::{HealthStatusCache, HealthSummary, HealthWorker, HttpProber, Probe};
use alertroute_metrics::{
    HealthStatusCollector, MetricsAggregator, MetricsHistory, MetricsSnapshot, PublishStats,
    PublishStatsCollector, RefreshStatusCollector, TargetInventoryCollector, TrendAnalyzer,
    TrendReport,
};

/// Operational state of the control plane
#[derive(Debug, Clone, Serialize)]
pub struct ControlPlaneState {
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
    pub running: bool,
}

/// The assembled publishing-target control plane.
///
/// Owns the registry and status cache for the process lifetime; downstream
/// publishers read the registry through [`ControlPlane::registry`].
pub struct ControlPlane {
    config: ControlPlaneConfig,
    registry: Arc<TargetRegistry>,
    engine: Arc<DiscoveryEngine>,
    orchestrator: Arc<RefreshOrchestrator>,
    cache: Arc<HealthStatusCache>,
    worker: HealthWorker,
    aggregator: Arc<MetricsAggregator>,
    history: Arc<MetricsHistory>,
    analyzer: TrendAnalyzer,
    publish_stats: Arc<PublishStats>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl ControlPlane {
    /// Assemble the control plane with the production HTTP prober.
    pub fn new(store: Arc<dyn ConfigStore>, config: ControlPlaneConfig) -> Result<ControlPlane> {
        let prober = Arc::new(HttpProber::new(config.health.clone())?);
        Self::with_probe(store, config, prober)
    }

    /// Assemble with a caller-supplied probe implementation.
    pub fn with_probe(
        store: Arc<dyn ConfigStore>,
        config: ControlPlaneConfig,
        probe: Arc<dyn Probe>,
    ) -> Result<ControlPlane> {
        config.validate()?;
        info!("initializing publishing target control plane");

        let registry = TargetRegistry::new();
        let engine = DiscoveryEngine::new(store, Arc::clone(&registry), config.discovery.clone());
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            Arc::clone(&engine),
            config.refresh.clone(),
        )?);
        let cache = HealthStatusCache::new();
        let worker = HealthWorker::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            probe,
            config.health.clone(),
        )?;

        let publish_stats = PublishStats::new();
        let aggregator = MetricsAggregator::new(config.aggregator.clone())?;
        aggregator.register(TargetInventoryCollector::new(Arc::clone(&engine)));
        aggregator.register(RefreshStatusCollector::new(Arc::clone(&orchestrator)));
        aggregator.register(HealthStatusCollector::new(Arc::clone(&cache)));
        aggregator.register(PublishStatsCollector::new(Arc::clone(&publish_stats)));

        let history = MetricsHistory::new(&config.timeseries)?;
        let analyzer = TrendAnalyzer::new(Arc::clone(&history), config.trends.clone())?;

        Ok(ControlPlane {
            config,
            registry,
            engine,
            orchestrator,
            cache,
            worker,
            aggregator,
            history,
            analyzer,
            publish_stats,
            started_at: Mutex::new(None),
        })
    }

    /// Start the refresh and health loops.
    pub async fn start(&self) -> Result<()> {
        self.orchestrator.start()?;
        if let Err(err) = self.worker.start() {
            error!(error = %err, "health worker failed to start, rolling back");
            let _ = self.orchestrator.stop(Duration::from_secs(5)).await;
            return Err(err);
        }
        *self.started_at.lock() = Some(Utc::now());
        info!("control plane started");
        Ok(())
    }

    /// Stop the loops in reverse start order, waiting up to `timeout` each.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let mut first_error: Option<Error> = None;

        if let Err(err) = self.worker.stop(timeout).await {
            error!(error = %err, "health worker stop failed");
            first_error = Some(err);
        }
        if let Err(err) = self.orchestrator.stop(timeout).await {
            error!(error = %err, "refresh orchestrator stop failed");
            first_error.get_or_insert(err);
        }

        *self.started_at.lock() = None;
        match first_error {
            None => {
                info!("control plane stopped");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }

    pub fn state(&self) -> ControlPlaneState {
        let started_at = *self.started_at.lock();
        ControlPlaneState {
            started_at,
            uptime_seconds: started_at
                .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
                .unwrap_or(0),
            running: self.orchestrator.is_running(),
        }
    }

    // --- discovery / refresh surface ---

    /// Kick off an asynchronous refresh, subject to rate limit and
    /// single-flight.
    pub fn trigger_refresh(&self) -> Result<()> {
        self.orchestrator.refresh_now()
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        self.orchestrator.status()
    }

    pub fn discovery_stats(&self) -> DiscoveryStats {
        self.engine.stats()
    }

    pub async fn store_health(&self) -> Result<()> {
        self.engine.store_health().await
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    // --- health surface ---

    pub fn target_health(&self, name: &str) -> Option<TargetHealthStatus> {
        self.cache.get(name)
    }

    pub fn all_target_health(&self) -> Vec<TargetHealthStatus> {
        self.cache.get_all()
    }

    pub fn health_summary(&self) -> HealthSummary {
        HealthSummary::from_cache(&self.cache)
    }

    /// Probe one target immediately and return the updated status.
    pub async fn check_target(&self, name: &str) -> Result<TargetHealthStatus> {
        self.worker.check_now(name).await
    }

    /// One immediate sweep over all enabled targets.
    pub async fn sweep_now(&self) -> usize {
        self.worker.check_all(CheckTrigger::Manual).await
    }

    // --- metrics surface ---

    /// Collect a snapshot and retain it in the history ring.
    pub async fn record_snapshot(&self) -> MetricsSnapshot {
        let snapshot = self.aggregator.collect_all().await;
        self.history.record(snapshot.clone());
        snapshot
    }

    pub fn trends(&self) -> TrendReport {
        self.analyzer.analyze()
    }

    pub fn history(&self) -> &Arc<MetricsHistory> {
        &self.history
    }

    pub fn publish_stats(&self) -> &Arc<PublishStats> {
        &self.publish_stats
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }
}
