//! In-memory registry of validated publishing targets
//!
//! The registry holds one immutable snapshot behind a read-many/write-one
//! lock. `set` swaps the whole snapshot; readers either see the previous
//! snapshot or the new one, never a mixture.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use alertroute_common::{TargetDescriptor, TargetType};

type Snapshot = Arc<HashMap<String, Arc<TargetDescriptor>>>;

/// Thread-safe snapshot of the currently valid targets
#[derive(Debug, Default)]
pub struct TargetRegistry {
    snapshot: RwLock<Snapshot>,
}

impl TargetRegistry {
    pub fn new() -> Arc<TargetRegistry> {
        Arc::new(TargetRegistry::default())
    }

    /// Atomically replace the whole target set.
    ///
    /// Entries with an empty name are dropped on input; on duplicate names
    /// the later entry wins.
    pub fn set(&self, targets: Vec<TargetDescriptor>) {
        let mut next = HashMap::with_capacity(targets.len());
        for descriptor in targets {
            if descriptor.name.is_empty() {
                debug!("dropping registry entry with empty name");
                continue;
            }
            next.insert(descriptor.name.clone(), Arc::new(descriptor));
        }
        let count = next.len();
        *self.snapshot.write() = Arc::new(next);
        debug!(targets = count, "registry snapshot replaced");
    }

    /// Look up a target by name.
    pub fn get(&self, name: &str) -> Option<Arc<TargetDescriptor>> {
        self.snapshot.read().get(name).cloned()
    }

    /// Stable snapshot of all targets, safe to iterate while `set` runs.
    pub fn list(&self) -> Vec<Arc<TargetDescriptor>> {
        self.snapshot.read().values().cloned().collect()
    }

    /// Snapshot subset of the given type.
    pub fn filter_by_type(&self, target_type: TargetType) -> Vec<Arc<TargetDescriptor>> {
        self.snapshot
            .read()
            .values()
            .filter(|descriptor| descriptor.target_type == target_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    /// Number of targets currently enabled.
    pub fn enabled_count(&self) -> usize {
        self.snapshot
            .read()
            .values()
            .filter(|descriptor| descriptor.enabled)
            .count()
    }
}
