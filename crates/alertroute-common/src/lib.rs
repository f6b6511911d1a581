//! Shared types and utilities for the alertroute control plane
//!
//! This crate provides the error taxonomy, configuration, and domain types
//! used across the discovery, health, and metrics crates.

pub mod config;
pub mod error;
pub mod redact;
pub mod types;

pub use config::{
    AggregatorConfig, ControlPlaneConfig, DiscoveryConfig, HealthConfig, RefreshConfig,
    TimeSeriesConfig, TrendConfig,
};
pub use error::{classify, classify_connect, classify_http, classify_message};
pub use error::{Classification, Error, ErrorKind, Result};
pub use types::*;
