//! Target discovery and refresh orchestration for alertroute
//!
//! Converts externally stored target descriptors into a live, validated
//! in-memory registry, and keeps that registry fresh on a schedule with
//! bounded retries and single-flight manual triggers.

pub mod engine;
pub mod parser;
pub mod registry;
pub mod refresh;
pub mod store;

pub use engine::{DiscoveryEngine, DiscoveryOutcome};
pub use parser::{parse_and_validate, parse_record, RawDescriptor};
pub use refresh::RefreshOrchestrator;
pub use registry::TargetRegistry;
pub use store::{ConfigRecord, ConfigStore, LabelSelector, MemoryStore};
