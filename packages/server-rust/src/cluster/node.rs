//! Peer node abstraction for replicated caches.
//!
//! [`PeerNode`] is the ordered-broadcast collaborator the worker talks to
//! in remote mode: apply a mutation, acquire/release row locks. The
//! transport behind it (in-process, TCP, whatever the host provides) is
//! not this crate's concern; [`InProcessNode`] is the implementation used
//! for same-process peers and tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::locks::RowLockManager;
use crate::cluster::messages::Mutation;
use crate::storage::StorageEngine;

/// One peer participating in a replicated cache.
///
/// Implementations must apply mutations in the order they are delivered;
/// the worker's serialisation provides that order on the sending side.
#[async_trait]
pub trait PeerNode: Send + Sync {
    /// Stable identifier, reported in replication failures.
    fn node_id(&self) -> &str;

    /// Applies one mutation to this node's storage.
    async fn apply(&self, mutation: &Mutation) -> anyhow::Result<()>;

    /// Acquires row locks for `keys` (sorted, deduplicated) on this node.
    async fn lock_keys(&self, keys: &[String]) -> anyhow::Result<()>;

    /// Releases row locks for `keys` on this node. Best-effort.
    async fn unlock_keys(&self, keys: &[String]);
}

/// Peer node living in the same process, applying mutations directly to
/// a [`StorageEngine`].
pub struct InProcessNode {
    id: String,
    engine: Arc<dyn StorageEngine>,
    locks: RowLockManager,
}

impl InProcessNode {
    /// Creates a node around the given engine.
    #[must_use]
    pub fn new(id: impl Into<String>, engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            id: id.into(),
            engine,
            locks: RowLockManager::new(),
        }
    }

    /// The engine this node applies mutations to.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }
}

#[async_trait]
impl PeerNode for InProcessNode {
    fn node_id(&self) -> &str {
        &self.id
    }

    async fn apply(&self, mutation: &Mutation) -> anyhow::Result<()> {
        match mutation {
            Mutation::Put { key, record } => {
                self.engine.put(key, record.clone());
            }
            Mutation::Remove { key } => {
                self.engine.remove(key);
            }
            Mutation::Clear => {
                self.engine.clear();
            }
        }
        Ok(())
    }

    async fn lock_keys(&self, keys: &[String]) -> anyhow::Result<()> {
        self.locks.lock(keys).await;
        Ok(())
    }

    async fn unlock_keys(&self, keys: &[String]) {
        self.locks.unlock(keys);
    }
}
