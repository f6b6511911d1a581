//! Domain types shared across the alertroute control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ErrorKind;

/// Kind of endpoint alerts are published to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Rootly,
    Pagerduty,
    Slack,
    Webhook,
}

impl TargetType {
    pub const ALL: [TargetType; 4] = [
        TargetType::Rootly,
        TargetType::Pagerduty,
        TargetType::Slack,
        TargetType::Webhook,
    ];

    pub fn parse(s: &str) -> Option<TargetType> {
        match s {
            "rootly" => Some(TargetType::Rootly),
            "pagerduty" => Some(TargetType::Pagerduty),
            "slack" => Some(TargetType::Slack),
            "webhook" => Some(TargetType::Webhook),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::Rootly => "rootly",
            TargetType::Pagerduty => "pagerduty",
            TargetType::Slack => "slack",
            TargetType::Webhook => "webhook",
        }
    }

    /// Payload formats a target of this type accepts.
    pub fn compatible_formats(self) -> &'static [PayloadFormat] {
        match self {
            TargetType::Rootly => &[PayloadFormat::Rootly],
            TargetType::Pagerduty => &[PayloadFormat::Pagerduty],
            TargetType::Slack => &[PayloadFormat::Slack],
            TargetType::Webhook => &[PayloadFormat::Alertmanager, PayloadFormat::Webhook],
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format of the published alert payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Alertmanager,
    Rootly,
    Pagerduty,
    Slack,
    Webhook,
}

impl PayloadFormat {
    pub fn parse(s: &str) -> Option<PayloadFormat> {
        match s {
            "alertmanager" => Some(PayloadFormat::Alertmanager),
            "rootly" => Some(PayloadFormat::Rootly),
            "pagerduty" => Some(PayloadFormat::Pagerduty),
            "slack" => Some(PayloadFormat::Slack),
            "webhook" => Some(PayloadFormat::Webhook),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayloadFormat::Alertmanager => "alertmanager",
            PayloadFormat::Rootly => "rootly",
            PayloadFormat::Pagerduty => "pagerduty",
            PayloadFormat::Slack => "slack",
            PayloadFormat::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated configuration of a single publishing target.
///
/// Descriptors are produced by the parser from opaque store records and are
/// immutable once they enter the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub url: String,
    pub format: PayloadFormat,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub filter_config: HashMap<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

/// Lifecycle state of a target as seen by the health worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    /// Numeric encoding used by the `target_health_status` gauge.
    pub fn as_gauge(self) -> f64 {
        match self {
            HealthState::Unknown => 0.0,
            HealthState::Healthy => 1.0,
            HealthState::Degraded => 2.0,
            HealthState::Unhealthy => 3.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target health record maintained by the health worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetHealthStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub enabled: bool,
    pub status: HealthState,
    pub latency_ms: Option<u64>,
    pub error_message: Option<String>,
    pub last_check_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub success_rate: f64,
}

impl TargetHealthStatus {
    /// Never-checked record for a freshly discovered target.
    pub fn unknown(name: &str, target_type: TargetType, enabled: bool) -> Self {
        TargetHealthStatus {
            name: name.to_string(),
            target_type,
            enabled,
            status: HealthState::Unknown,
            latency_ms: None,
            error_message: None,
            last_check_at: Utc::now(),
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            total_checks: 0,
            total_successes: 0,
            total_failures: 0,
            success_rate: 0.0,
        }
    }

    /// Recompute `success_rate` from the check counters.
    pub fn recompute_success_rate(&mut self) {
        self.success_rate = if self.total_checks == 0 {
            0.0
        } else {
            100.0 * self.total_successes as f64 / self.total_checks as f64
        };
    }
}

/// What caused a health check to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckTrigger {
    Periodic,
    Manual,
}

impl CheckTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckTrigger::Periodic => "periodic",
            CheckTrigger::Manual => "manual",
        }
    }
}

/// Immutable outcome of a single connectivity probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub url: String,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub checked_at: DateTime<Utc>,
    pub trigger: CheckTrigger,
}

/// State of the refresh orchestrator's current or last attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    InProgress,
    Success,
    Failed,
}

/// Status block published by the refresh orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub state: RefreshState,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub targets_total: u64,
    pub targets_valid: u64,
    pub targets_invalid: u64,
    pub last_error_message: Option<String>,
    pub consecutive_failures: u32,
}

impl Default for RefreshStatus {
    fn default() -> Self {
        RefreshStatus {
            state: RefreshState::Idle,
            last_success_at: None,
            next_scheduled_at: None,
            last_duration_ms: None,
            targets_total: 0,
            targets_valid: 0,
            targets_invalid: 0,
            last_error_message: None,
            consecutive_failures: 0,
        }
    }
}

/// Counters published by the discovery engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub total_records: u64,
    pub valid_count: u64,
    pub invalid_count: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub cumulative_error_count: u64,
    pub transient_error_count: u64,
}
