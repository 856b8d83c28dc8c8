//! The cache instance: options, request model, worker, janitor, handle.
//!
//! [`Cache`] is the public entry point; everything else in this module
//! backs it. The worker serialises all operations, the janitor feeds it
//! periodic purges, and the handle turns method calls into queued
//! commands.

pub mod handle;
pub mod janitor;
pub mod options;
pub mod request;
pub mod worker;

pub use handle::Cache;
pub use options::{
    fallback_fn, CacheOptions, CacheOptionsBuilder, Fallback, DEFAULT_CALL_TIMEOUT_MS,
    DEFAULT_HOOK_QUEUE_CAPACITY, DEFAULT_REPLICATION_ACK_TIMEOUT_MS,
};
pub use request::{
    GetOptions, IncrOptions, Lookup, MutationOptions, Origin, TtlStatus, WriteOptions,
};
