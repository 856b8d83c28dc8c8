//! In-memory [`StorageEngine`] implementation backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking.
//! Suitable for production workloads where all data fits in memory,
//! which for this cache is every workload.

use cachegrid_core::CacheRecord;
use dashmap::DashMap;

use crate::storage::engine::StorageEngine;

/// In-memory storage backed by [`DashMap`].
///
/// Reads are lock-free and writes use fine-grained sharding internally,
/// which suits the read-heavy access patterns a cache sees. `update`
/// holds the shard guard for the duration of the closure, making
/// read-modify-write linearisable per key.
pub struct DashMapStorage {
    entries: DashMap<String, CacheRecord>,
}

impl DashMapStorage {
    /// Creates a new, empty `DashMapStorage`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for DashMapStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for DashMapStorage {
    fn get(&self, key: &str) -> Option<CacheRecord> {
        self.entries.get(key).map(|r| r.clone())
    }

    fn put(&self, key: &str, record: CacheRecord) -> Option<CacheRecord> {
        self.entries.insert(key.to_string(), record)
    }

    fn remove(&self, key: &str) -> Option<CacheRecord> {
        self.entries.remove(key).map(|(_, r)| r)
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(CacheRecord) -> CacheRecord,
    ) -> Option<CacheRecord> {
        let mut entry = self.entries.get_mut(key)?;
        let next = f(entry.clone());
        *entry = next.clone();
        Some(next)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    fn snapshot(&self) -> Vec<(String, CacheRecord)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
