//! Mutation broadcast across peer nodes.
//!
//! [`Replicator::broadcast`] applies a mutation on every configured peer
//! and succeeds only when all of them acknowledge. Nodes that acked
//! before another failed are NOT rolled back: the failure report names
//! the failed nodes and the survivors keep the mutation. Rolling back
//! would require a second broadcast that can itself partially fail.
//!
//! [`Replicator::transactional`] layers row locks over a critical
//! section: locks are acquired on all nodes in sorted key order and
//! released on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::cluster::messages::Mutation;
use crate::cluster::node::PeerNode;
use crate::error::CacheError;

/// Broadcast layer over the configured peer nodes.
pub struct Replicator {
    nodes: Vec<Arc<dyn PeerNode>>,
    ack_timeout: Duration,
}

impl Replicator {
    /// Creates a replicator over `nodes` with a per-node ack timeout.
    #[must_use]
    pub fn new(nodes: Vec<Arc<dyn PeerNode>>, ack_timeout_ms: u64) -> Self {
        Self {
            nodes,
            ack_timeout: Duration::from_millis(ack_timeout_ms),
        }
    }

    /// Number of peers this replicator fans out to.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Applies `mutation` on every peer concurrently.
    ///
    /// # Errors
    ///
    /// [`CacheError::ReplicationFailed`] naming every node that errored
    /// or timed out. Acknowledged nodes keep the mutation.
    pub async fn broadcast(&self, mutation: &Mutation) -> Result<(), CacheError> {
        let ack_timeout = self.ack_timeout;
        let attempts = self.nodes.iter().map(|node| async move {
            match tokio::time::timeout(ack_timeout, node.apply(mutation)).await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => {
                    tracing::warn!(node = node.node_id(), error = %err, "peer rejected mutation");
                    Some(node.node_id().to_string())
                }
                Err(_elapsed) => {
                    tracing::warn!(node = node.node_id(), "peer ack timed out");
                    Some(node.node_id().to_string())
                }
            }
        });

        let failed_nodes: Vec<String> = join_all(attempts).await.into_iter().flatten().collect();
        if failed_nodes.is_empty() {
            Ok(())
        } else {
            Err(CacheError::ReplicationFailed { failed_nodes })
        }
    }

    /// Acquires row locks for `keys` on every node.
    ///
    /// Nodes are locked one at a time; if any node fails, locks already
    /// taken are released before returning.
    ///
    /// # Errors
    ///
    /// [`CacheError::ReplicationFailed`] naming the node that failed.
    pub async fn lock_all(&self, keys: &[String]) -> Result<(), CacheError> {
        for (locked, node) in self.nodes.iter().enumerate() {
            let attempt = tokio::time::timeout(self.ack_timeout, node.lock_keys(keys)).await;
            let failed = match attempt {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => {
                    tracing::warn!(node = node.node_id(), error = %err, "row lock refused");
                    node.node_id().to_string()
                }
                Err(_elapsed) => {
                    tracing::warn!(node = node.node_id(), "row lock timed out");
                    node.node_id().to_string()
                }
            };
            for prior in &self.nodes[..locked] {
                prior.unlock_keys(keys).await;
            }
            return Err(CacheError::ReplicationFailed {
                failed_nodes: vec![failed],
            });
        }
        Ok(())
    }

    /// Releases row locks for `keys` on every node. Best-effort.
    pub async fn unlock_all(&self, keys: &[String]) {
        for node in &self.nodes {
            node.unlock_keys(keys).await;
        }
    }

    /// Runs `f` with row locks held on `keys` across all nodes.
    ///
    /// Keys are sorted and deduplicated before locking so overlapping
    /// transactional sections cannot deadlock. Locks are released on
    /// every exit path, including when `f` errors.
    ///
    /// # Errors
    ///
    /// Lock acquisition failures surface as
    /// [`CacheError::ReplicationFailed`]; otherwise whatever `f` returns.
    pub async fn transactional<T, Fut>(
        &self,
        keys: &[String],
        f: impl FnOnce() -> Fut,
    ) -> Result<T, CacheError>
    where
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let keys = normalise_keys(keys);
        self.lock_all(&keys).await?;
        let result = f().await;
        self.unlock_all(&keys).await;
        result
    }
}

/// Sorts and deduplicates a key set for deadlock-free lock ordering.
#[must_use]
pub fn normalise_keys(keys: &[String]) -> Vec<String> {
    let mut keys = keys.to_vec();
    keys.sort();
    keys.dedup();
    keys
}
