//! Process-wide registry of named running caches.
//!
//! Enforces name uniqueness and owns stop-by-name. Caches started
//! directly through [`Cache::start`](crate::cache::Cache::start) bypass
//! the registry and its uniqueness guarantee.

use dashmap::DashMap;

use crate::cache::{Cache, CacheOptions};
use crate::error::CacheError;

/// Registry mapping cache names to running instances.
///
/// One registry per process is the expected deployment; tests create
/// their own.
#[derive(Default)]
pub struct CacheRegistry {
    caches: DashMap<String, Cache>,
}

impl CacheRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a cache and registers it under its name.
    ///
    /// # Errors
    ///
    /// [`CacheError::NameInUse`] when a cache with the same name is
    /// already registered; any [`Cache::start`] failure otherwise.
    pub fn start(&self, options: CacheOptions) -> Result<Cache, CacheError> {
        let name = options.name.clone();
        if self.caches.contains_key(&name) {
            return Err(CacheError::NameInUse { name });
        }

        let cache = Cache::start(options)?;
        // Entry API closes the check-then-insert race between two
        // concurrent starts of the same name.
        match self.caches.entry(name) {
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(cache.clone());
                Ok(cache)
            }
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                cache.stop();
                Err(CacheError::NameInUse {
                    name: entry.key().clone(),
                })
            }
        }
    }

    /// Looks up a running cache by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Cache> {
        self.caches.get(name).map(|entry| entry.value().clone())
    }

    /// Stops and deregisters a cache. Returns `true` if it was running.
    pub fn stop(&self, name: &str) -> bool {
        match self.caches.remove(name) {
            Some((_, cache)) => {
                cache.stop();
                true
            }
            None => false,
        }
    }

    /// Names of all registered caches, unordered.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.caches.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered caches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// `true` when no cache is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
