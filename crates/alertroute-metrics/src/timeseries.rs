//! Fixed-capacity history of metric snapshots
//!
//! A true ring: head index plus size, O(1) overwrite at the write head.
//! Insertion runs on the observer path, so it must never reallocate or
//! shift.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use alertroute_common::{Result, TimeSeriesConfig};

use crate::collector::MetricsSnapshot;

/// Floor for the ring capacity regardless of configured retention.
const MIN_CAPACITY: usize = 10;

/// Ring buffer of metric snapshots with age-based cleanup
pub struct MetricsHistory {
    ring: RwLock<Ring>,
    retention: Duration,
}

struct Ring {
    slots: Vec<Option<MetricsSnapshot>>,
    head: usize,
    len: usize,
}

impl Ring {
    fn ordered(&self) -> Vec<MetricsSnapshot> {
        let capacity = self.slots.len();
        let start = (self.head + capacity - self.len) % capacity;
        (0..self.len)
            .filter_map(|offset| self.slots[(start + offset) % capacity].clone())
            .collect()
    }
}

impl MetricsHistory {
    /// Capacity is one slot per retention minute, floored at 10.
    pub fn new(config: &TimeSeriesConfig) -> Result<Arc<MetricsHistory>> {
        config.validate()?;
        let capacity = (config.retention_minutes as usize).max(MIN_CAPACITY);
        Ok(Arc::new(MetricsHistory {
            ring: RwLock::new(Ring {
                slots: vec![None; capacity],
                head: 0,
                len: 0,
            }),
            retention: config.retention(),
        }))
    }

    /// O(1) insert, overwriting the oldest entry once full.
    pub fn record(&self, snapshot: MetricsSnapshot) {
        let mut ring = self.ring.write();
        let capacity = ring.slots.len();
        let head = ring.head;
        ring.slots[head] = Some(snapshot);
        ring.head = (head + 1) % capacity;
        if ring.len < capacity {
            ring.len += 1;
        }
    }

    /// All retained snapshots, oldest first.
    pub fn get_all(&self) -> Vec<MetricsSnapshot> {
        self.ring.read().ordered()
    }

    /// Snapshots with `start <= timestamp <= end`, oldest first.
    pub fn get_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<MetricsSnapshot> {
        self.ring
            .read()
            .ordered()
            .into_iter()
            .filter(|snapshot| snapshot.timestamp >= start && snapshot.timestamp <= end)
            .collect()
    }

    /// At most the last `n` snapshots, oldest first.
    pub fn get_latest(&self, n: usize) -> Vec<MetricsSnapshot> {
        let all = self.ring.read().ordered();
        let skip = all.len().saturating_sub(n);
        all.into_iter().skip(skip).collect()
    }

    /// Drop entries older than the retention window, compacting in place.
    /// Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention)
                .unwrap_or_else(|_| chrono::Duration::days(1));

        let mut ring = self.ring.write();
        let kept: Vec<MetricsSnapshot> = ring
            .ordered()
            .into_iter()
            .filter(|snapshot| snapshot.timestamp >= cutoff)
            .collect();
        let removed = ring.len - kept.len();
        if removed > 0 {
            let capacity = ring.slots.len();
            ring.slots.iter_mut().for_each(|slot| *slot = None);
            let len = kept.len();
            for (index, snapshot) in kept.into_iter().enumerate() {
                ring.slots[index] = Some(snapshot);
            }
            ring.head = len % capacity;
            ring.len = len;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.ring.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.read().slots.len()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}
