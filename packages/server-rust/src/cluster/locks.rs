//! Per-key row locks for transactional sections.
//!
//! A [`RowLockManager`] hands out async mutexes keyed by cache key.
//! Callers must acquire keys in sorted order (the replicator does) so two
//! transactional sections over overlapping key sets cannot deadlock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async per-key lock table.
///
/// `lock` parks the caller until each key's mutex is available and holds
/// the guards internally; `unlock` releases them. Lock entries are kept
/// once created -- the table grows with the set of keys ever locked,
/// which for row-locked workloads is the working set.
#[derive(Default)]
pub struct RowLockManager {
    locks: DashMap<String, Arc<Mutex<()>>>,
    held: DashMap<String, OwnedMutexGuard<()>>,
}

impl RowLockManager {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for every key, awaiting holders in turn.
    ///
    /// Keys must arrive sorted and deduplicated; locking the same key
    /// twice without an intervening unlock would deadlock on itself.
    pub async fn lock(&self, keys: &[String]) {
        for key in keys {
            let mutex = self
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let guard = mutex.lock_owned().await;
            self.held.insert(key.clone(), guard);
        }
    }

    /// Releases the lock for every key. Unheld keys are ignored.
    pub fn unlock(&self, keys: &[String]) {
        for key in keys {
            self.held.remove(key);
        }
    }

    /// Returns `true` if `key` is currently locked.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }
}
