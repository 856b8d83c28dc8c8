//! Error taxonomy for cache operations.
//!
//! A missing key is a status, not an error: lookups report it through
//! [`Lookup::Miss`](crate::cache::Lookup::Miss), TTL operations through
//! `Ok(false)`. `CacheError` covers the cases the caller genuinely cannot
//! treat as a normal outcome.

/// Errors surfaced by the cache API.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Startup options failed validation.
    #[error("invalid cache option: {reason}")]
    InvalidOption { reason: String },

    /// A cache with this name is already running in the process registry.
    #[error("cache name already in use: {name}")]
    NameInUse { name: String },

    /// `incr`/`decr` hit a value that is not an integer.
    #[error("value under key {key:?} is not a number")]
    NotANumber { key: String },

    /// `stats` called on a cache started without `record_stats`.
    #[error("statistics are not enabled for this cache")]
    StatsNotEnabled,

    /// The synchronous reply did not arrive within the call timeout.
    /// The worker still executes the request to completion.
    #[error("cache call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// One or more peer nodes did not acknowledge a broadcast mutation.
    /// Nodes that did acknowledge are NOT rolled back.
    #[error("replication failed on nodes: {failed_nodes:?}")]
    ReplicationFailed { failed_nodes: Vec<String> },

    /// The fallback function returned an error or panicked.
    #[error("fallback failed for key {key:?}: {reason}")]
    FallbackFailed { key: String, reason: String },

    /// The `get_and_update` closure panicked.
    #[error("update function failed for key {key:?}: {reason}")]
    UpdateFailed { key: String, reason: String },

    /// The worker task is gone (cache stopped or crashed mid-restart).
    #[error("cache is stopped")]
    Stopped,
}

impl CacheError {
    /// Stable kind tag, used in hook events and log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::InvalidOption { .. } => "invalid_option",
            CacheError::NameInUse { .. } => "name_in_use",
            CacheError::NotANumber { .. } => "not_a_number",
            CacheError::StatsNotEnabled => "stats_not_enabled",
            CacheError::Timeout { .. } => "timeout",
            CacheError::ReplicationFailed { .. } => "replication_failed",
            CacheError::FallbackFailed { .. } => "fallback_error",
            CacheError::UpdateFailed { .. } => "update_error",
            CacheError::Stopped => "stopped",
        }
    }
}
