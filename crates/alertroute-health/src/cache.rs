//! Per-target health status cache
//!
//! Status records are mutated through closure-based read-modify-write under
//! the write lock; concurrent updates for the same target never lose
//! increments. Reads hide entries whose last check is older than the
//! staleness cutoff, which hides targets that were disabled and later
//! re-enabled until the next sweep reaches them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use alertroute_common::TargetHealthStatus;

/// Default staleness cutoff for reads.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// Thread-safe store of per-target health records
pub struct HealthStatusCache {
    entries: RwLock<HashMap<String, TargetHealthStatus>>,
    max_age: chrono::Duration,
}

impl HealthStatusCache {
    pub fn new() -> Arc<HealthStatusCache> {
        Self::with_max_age(DEFAULT_MAX_AGE)
    }

    pub fn with_max_age(max_age: Duration) -> Arc<HealthStatusCache> {
        Arc::new(HealthStatusCache {
            entries: RwLock::new(HashMap::new()),
            max_age: chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::seconds(600)),
        })
    }

    fn is_fresh(&self, status: &TargetHealthStatus) -> bool {
        Utc::now().signed_duration_since(status.last_check_at) <= self.max_age
    }

    /// Status for one target, if present and fresh.
    pub fn get(&self, name: &str) -> Option<TargetHealthStatus> {
        let entries = self.entries.read();
        entries
            .get(name)
            .filter(|status| self.is_fresh(status))
            .cloned()
    }

    /// Overwrite a status record.
    pub fn set(&self, status: TargetHealthStatus) {
        self.entries.write().insert(status.name.clone(), status);
    }

    /// Snapshot of all fresh entries.
    pub fn get_all(&self) -> Vec<TargetHealthStatus> {
        self.entries
            .read()
            .values()
            .filter(|status| self.is_fresh(status))
            .cloned()
            .collect()
    }

    /// Atomic read-modify-write for one target.
    ///
    /// Returns the updated record, or `None` when the target is unknown.
    pub fn update<F>(&self, name: &str, mutate: F) -> Option<TargetHealthStatus>
    where
        F: FnOnce(&mut TargetHealthStatus),
    {
        let mut entries = self.entries.write();
        let status = entries.get_mut(name)?;
        mutate(status);
        Some(status.clone())
    }

    /// Atomic read-modify-write, inserting a seed record when absent.
    pub fn upsert<I, F>(&self, name: &str, init: I, mutate: F) -> TargetHealthStatus
    where
        I: FnOnce() -> TargetHealthStatus,
        F: FnOnce(&mut TargetHealthStatus),
    {
        let mut entries = self.entries.write();
        let status = entries.entry(name.to_string()).or_insert_with(init);
        mutate(status);
        status.clone()
    }

    pub fn delete(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
