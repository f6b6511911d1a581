//! Publishing target control plane for alert-processing services
//!
//! Converts externally stored target descriptors into a live, validated,
//! health-scored in-memory registry that downstream alert publishers query
//! to route messages. This crate assembles the subsystem crates and
//! re-exports their public surface.

pub mod control;

pub use control::{ControlPlane, ControlPlaneState};

pub use alertroute_common as common;
pub use alertroute_discovery as discovery;
pub use alertroute_health as health;
pub use alertroute_metrics as metrics;

pub use alertroute_common::{ControlPlaneConfig, Error, ErrorKind, Result, TargetDescriptor};
pub use alertroute_discovery::{ConfigRecord, ConfigStore, MemoryStore, TargetRegistry};
pub use alertroute_health::{HealthSummary, Probe};
pub use alertroute_metrics::{MetricsSnapshot, PublishOutcome, TrendReport};
