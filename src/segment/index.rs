//! Segment Index
//!
//! Key → offset of the last record for that key within one segment.

use std::collections::HashMap;

use parking_lot::RwLock;

/// In-memory index for a single segment
///
/// Only the active segment's index changes after load; closed segments
/// take the read lock uncontended.
#[derive(Debug, Default)]
pub struct SegmentIndex {
    entries: RwLock<HashMap<Vec<u8>, u64>>,
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a finished key → offset map
    pub fn from_map(entries: HashMap<Vec<u8>, u64>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Point `key` at `offset`, shadowing any earlier entry
    pub fn insert(&self, key: Vec<u8>, offset: u64) {
        self.entries.write().insert(key, offset);
    }

    pub fn get(&self, key: &[u8]) -> Option<u64> {
        self.entries.read().get(key).copied()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of all (key, offset) pairs, in no particular order
    pub fn entries(&self) -> Vec<(Vec<u8>, u64)> {
        self.entries
            .read()
            .iter()
            .map(|(k, &off)| (k.clone(), off))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }
}
