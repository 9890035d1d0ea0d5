/*
    retention.rs - Cross-boundary reference retention

    Keeps references handed across the boundary alive until explicitly released.

    Responsibilities:
    - Assign identities to cross-boundary references
    - Count nested acquires per reference
    - Reject releases without a matching acquire

    Acquire (retain) and release are the only two mutation points. A subscription
    retains its callback for exactly as long as the subscription lives.
*/

use crate::core_sync::errors::RetentionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::trace;
use uuid::Uuid;

/// Identity of a reference handed across the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefId(Uuid);

impl RefId {
    /// Generate a fresh identity
    pub fn generate() -> Self {
        RefId(Uuid::new_v4())
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Holds {
    counts: HashMap<RefId, usize>,
    acquired_total: u64,
    released_total: u64,
}

/// Registration table of retained references
#[derive(Debug, Default)]
pub struct RetentionTable {
    holds: Mutex<Holds>,
}

impl RetentionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn holds(&self) -> MutexGuard<'_, Holds> {
        self.holds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire a hold on a reference
    pub fn retain(&self, id: RefId) {
        let mut holds = self.holds();
        *holds.counts.entry(id).or_insert(0) += 1;
        holds.acquired_total += 1;
        trace!(ref_id = %id, "retained reference");
    }

    /// Release one hold on a reference
    pub fn release(&self, id: RefId) -> Result<(), RetentionError> {
        let mut holds = self.holds();
        match holds.counts.get_mut(&id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                holds.counts.remove(&id);
            }
            None => return Err(RetentionError::NotRetained(id)),
        }
        holds.released_total += 1;
        trace!(ref_id = %id, "released reference");
        Ok(())
    }

    /// Check whether a reference has at least one hold
    pub fn is_retained(&self, id: RefId) -> bool {
        self.holds().counts.contains_key(&id)
    }

    /// Number of outstanding holds on a reference
    pub fn hold_count(&self, id: RefId) -> usize {
        self.holds().counts.get(&id).copied().unwrap_or(0)
    }

    /// Number of distinct retained references
    pub fn len(&self) -> usize {
        self.holds().counts.len()
    }

    /// Check whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.holds().counts.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> RetentionStats {
        let holds = self.holds();
        RetentionStats {
            retained_refs: holds.counts.len(),
            acquired_total: holds.acquired_total,
            released_total: holds.released_total,
        }
    }
}

/// Retention statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionStats {
    pub retained_refs: usize,
    pub acquired_total: u64,
    pub released_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_and_release() {
        let table = RetentionTable::new();
        let id = RefId::generate();

        table.retain(id);
        assert!(table.is_retained(id));
        assert_eq!(table.hold_count(id), 1);

        table.release(id).unwrap();
        assert!(!table.is_retained(id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_nested_holds() {
        let table = RetentionTable::new();
        let id = RefId::generate();

        table.retain(id);
        table.retain(id);
        assert_eq!(table.hold_count(id), 2);
        assert_eq!(table.len(), 1);

        table.release(id).unwrap();
        assert!(table.is_retained(id));
        table.release(id).unwrap();
        assert!(!table.is_retained(id));
    }

    #[test]
    fn test_double_release_rejected() {
        let table = RetentionTable::new();
        let id = RefId::generate();

        table.retain(id);
        table.release(id).unwrap();

        let err = table.release(id).unwrap_err();
        assert_eq!(err, RetentionError::NotRetained(id));

        let stats = table.stats();
        assert_eq!(stats.acquired_total, 1);
        assert_eq!(stats.released_total, 1);
    }

    #[test]
    fn test_ref_ids_are_unique() {
        assert_ne!(RefId::generate(), RefId::generate());
    }
}
