//! Replication layer: peer nodes, row locks, and the mutation broadcast.
//!
//! Only caches configured with peer nodes route writes through this
//! module; a non-replicated cache bypasses it entirely.

pub mod locks;
pub mod messages;
pub mod node;
pub mod replicator;

pub use locks::RowLockManager;
pub use messages::Mutation;
pub use node::{InProcessNode, PeerNode};
pub use replicator::{normalise_keys, Replicator};
