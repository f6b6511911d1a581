//! Configuration for the alertroute control plane
//!
//! Every tunable the control loops consume lives here. Durations are carried
//! as integer millisecond fields so configs stay flat for the config loader;
//! accessor methods hand out `Duration` values to the components.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Root configuration for the control plane
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub timeseries: TimeSeriesConfig,
    #[serde(default)]
    pub trends: TrendConfig,
}

impl ControlPlaneConfig {
    /// Validate every section; configuration failure is the only error that
    /// prevents the control plane from starting.
    pub fn validate(&self) -> Result<()> {
        self.refresh.validate()?;
        self.health.validate()?;
        self.aggregator.validate()?;
        self.timeseries.validate()?;
        self.trends.validate()?;
        Ok(())
    }
}

/// What to ask the external store for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Namespace the descriptor records live in
    pub namespace: String,
    /// Label selector, `k=v[,k2=v2]`; empty means no filter
    #[serde(default)]
    pub label_query: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            namespace: "monitoring".to_string(),
            label_query: "alertroute.io/target=true".to_string(),
        }
    }
}

/// Refresh orchestrator tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Scheduled cadence between refreshes
    pub interval_ms: u64,
    /// Attempts per refresh before giving up
    pub max_attempts: u32,
    /// First backoff delay between attempts
    pub base_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
    /// Minimum spacing between accepted manual triggers
    pub rate_limit_window_ms: u64,
    /// Deadline for a single discovery attempt
    pub attempt_timeout_ms: u64,
    /// Sleep before the first refresh after start
    pub warmup_period_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_ms: 300_000,
            max_attempts: 5,
            base_backoff_ms: 30_000,
            max_backoff_ms: 300_000,
            rate_limit_window_ms: 60_000,
            attempt_timeout_ms: 30_000,
            warmup_period_ms: 30_000,
        }
    }
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::Config("refresh interval must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("refresh max_attempts must be positive".into()));
        }
        if self.base_backoff_ms == 0 {
            return Err(Error::Config("refresh base_backoff must be positive".into()));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(Error::Config(
                "refresh max_backoff must be >= base_backoff".into(),
            ));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(Error::Config(
                "refresh attempt_timeout must be positive".into(),
            ));
        }
        if self.rate_limit_window_ms == 0 {
            return Err(Error::Config(
                "refresh rate_limit_window must be positive".into(),
            ));
        }
        if self.warmup_period_ms == 0 {
            return Err(Error::Config(
                "refresh warmup_period must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn warmup_period(&self) -> Duration {
        Duration::from_millis(self.warmup_period_ms)
    }
}

/// Health worker and prober tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Cadence between periodic sweeps
    pub check_interval_ms: u64,
    /// Timeout applied to the TCP preflight and the HTTP GET
    pub http_timeout_ms: u64,
    /// Sleep before the first sweep after start
    pub warmup_delay_ms: u64,
    /// Consecutive failures before a target is unhealthy
    pub failure_threshold: u32,
    /// Successful checks at or above this latency are degraded
    pub degraded_latency_threshold_ms: u64,
    /// Bounded parallelism of a sweep
    pub max_concurrent_checks: usize,
    /// Idle connection pool size for the shared HTTP client
    pub max_idle_conns: usize,
    /// Skip TLS certificate verification (lab setups only)
    pub tls_skip_verify: bool,
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            check_interval_ms: 120_000,
            http_timeout_ms: 5_000,
            warmup_delay_ms: 10_000,
            failure_threshold: 3,
            degraded_latency_threshold_ms: 5_000,
            max_concurrent_checks: 10,
            max_idle_conns: 100,
            tls_skip_verify: false,
            follow_redirects: true,
            max_redirects: 3,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_ms == 0 {
            return Err(Error::Config("health check_interval must be positive".into()));
        }
        if self.http_timeout_ms == 0 {
            return Err(Error::Config("health http_timeout must be positive".into()));
        }
        if self.failure_threshold == 0 {
            return Err(Error::Config(
                "health failure_threshold must be positive".into(),
            ));
        }
        if self.max_concurrent_checks == 0 {
            return Err(Error::Config(
                "health max_concurrent_checks must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn warmup_delay(&self) -> Duration {
        Duration::from_millis(self.warmup_delay_ms)
    }

    pub fn degraded_latency_threshold(&self) -> Duration {
        Duration::from_millis(self.degraded_latency_threshold_ms)
    }
}

/// Metric aggregator tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Deadline for one `collect_all` pass
    pub collect_deadline_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            collect_deadline_ms: 5_000,
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.collect_deadline_ms == 0 {
            return Err(Error::Config(
                "aggregator collect_deadline must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn collect_deadline(&self) -> Duration {
        Duration::from_millis(self.collect_deadline_ms)
    }
}

/// Time-series history tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
    /// How long snapshots are kept; also sizes the ring (one slot per minute)
    pub retention_minutes: u64,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        TimeSeriesConfig {
            retention_minutes: 24 * 60,
        }
    }
}

impl TimeSeriesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retention_minutes == 0 {
            return Err(Error::Config(
                "timeseries retention_minutes must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_minutes * 60)
    }
}

/// Trend and anomaly detector tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Smoothing factor for exponential moving averages, (0, 1]
    pub ema_alpha: f64,
    /// Error-spike threshold in standard deviations
    pub anomaly_threshold: f64,
    /// Percent delta separating a trend from noise
    pub trend_threshold_pct: f64,
    /// How much history the analyzer considers
    pub history_retention_hours: u64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        TrendConfig {
            ema_alpha: 0.3,
            anomaly_threshold: 3.0,
            trend_threshold_pct: 5.0,
            history_retention_hours: 24,
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(Error::Config("trends ema_alpha must be in (0, 1]".into()));
        }
        if self.anomaly_threshold <= 0.0 {
            return Err(Error::Config(
                "trends anomaly_threshold must be positive".into(),
            ));
        }
        if self.trend_threshold_pct <= 0.0 {
            return Err(Error::Config(
                "trends trend_threshold_pct must be positive".into(),
            ));
        }
        if self.history_retention_hours == 0 {
            return Err(Error::Config(
                "trends history_retention_hours must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_hours * 3600)
    }
}
