//! Low-level storage engine trait.
//!
//! Defines [`StorageEngine`], the concurrent keyed table the cache worker
//! mutates. Single-key operations are linearisable; [`StorageEngine::snapshot`]
//! is only weakly consistent, which is sufficient for janitor sweeps and
//! approximate size reporting.

use cachegrid_core::CacheRecord;

/// Concurrent key-to-record table backing one cache instance.
///
/// Wrapped in `Arc<dyn StorageEngine>` for sharing across tasks. The
/// worker is the sole mutator in steady state; the janitor and peer
/// replication reach the engine through the worker (or, for in-process
/// peers, through [`Mutation`](crate::cluster::Mutation) application).
pub trait StorageEngine: Send + Sync + 'static {
    /// Retrieve a record by key, or `None` if not present.
    fn get(&self, key: &str) -> Option<CacheRecord>;

    /// Insert or replace a record by key. Returns the previous record if any.
    fn put(&self, key: &str, record: CacheRecord) -> Option<CacheRecord>;

    /// Remove a record by key, returning the removed record.
    fn remove(&self, key: &str) -> Option<CacheRecord>;

    /// Atomically replace the record under `key` with `f(record)`.
    ///
    /// Returns the new record, or `None` if the key was absent (in which
    /// case `f` is never called). The closure runs under the engine's
    /// per-key guard.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(CacheRecord) -> CacheRecord,
    ) -> Option<CacheRecord>;

    /// Check if a key exists without returning the record.
    fn contains_key(&self, key: &str) -> bool;

    /// Return the number of entries, logically-expired entries included.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries. Returns the number of entries removed.
    /// Takes `&self` for `Arc<dyn StorageEngine>` compatibility.
    fn clear(&self) -> usize;

    /// Return a point-in-time snapshot of all entries.
    ///
    /// Weakly consistent: observes some linearisation of the operations
    /// that completed before the call started, and may or may not see
    /// concurrently committed ones.
    fn snapshot(&self) -> Vec<(String, CacheRecord)>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// Verifies `Arc<dyn StorageEngine>` compiles (object safety).
    #[test]
    fn storage_engine_is_object_safe() {
        fn _assert_object_safe(_: &Arc<dyn StorageEngine>) {}
    }
}
