//! Health monitoring for alertroute publishing targets
//!
//! Probes every active target on a schedule with bounded parallelism,
//! tracks per-target status through a small state machine, and exposes
//! both individual records and fleet-wide rollups.

pub mod cache;
pub mod prober;
pub mod stats;
pub mod worker;

pub use cache::{HealthStatusCache, DEFAULT_MAX_AGE};
pub use prober::{HttpProber, Probe};
pub use stats::HealthSummary;
pub use worker::HealthWorker;
