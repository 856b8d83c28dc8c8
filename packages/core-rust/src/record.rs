//! Record type stored under each cache key.
//!
//! A [`CacheRecord`] pairs the payload with the timestamp that established
//! its TTL base. Expiry is purely arithmetic: a record whose deadline has
//! passed may still sit in storage until a sweep or a read observes it,
//! but `is_expired` is the single definition of "logically expired" used
//! everywhere.

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// A single cache entry: payload plus TTL bookkeeping.
///
/// `touched` is the millisecond timestamp of the write that last
/// established the TTL base; `ttl_ms = None` means the record never
/// expires. Serialized to `MsgPack` when replicated to peer nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    /// Timestamp (ms) of the write that established the TTL base.
    pub touched: u64,
    /// Time-to-live in milliseconds. `None` never expires.
    pub ttl_ms: Option<u64>,
    /// The stored payload.
    pub value: Value,
}

impl CacheRecord {
    /// Creates a record touched at `now` with the given TTL.
    #[must_use]
    pub fn new(value: Value, now: u64, ttl_ms: Option<u64>) -> Self {
        Self {
            touched: now,
            ttl_ms,
            value,
        }
    }

    /// Returns `true` iff the record is logically expired at `now`.
    ///
    /// A record expires once `touched + ttl <= now`; records without a TTL
    /// never expire. The deadline addition saturates so a pathological TTL
    /// near `u64::MAX` reads as "never" rather than wrapping.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        match self.ttl_ms {
            Some(ttl) => self.touched.saturating_add(ttl) <= now,
            None => false,
        }
    }

    /// Remaining lifetime at `now`, `None` when the record has no TTL.
    ///
    /// An already-expired record reports `Some(0)`; callers on the read
    /// path evict before this can be observed by clients.
    #[must_use]
    pub fn remaining_ttl(&self, now: u64) -> Option<u64> {
        self.ttl_ms
            .map(|ttl| self.touched.saturating_add(ttl).saturating_sub(now))
    }

    /// Resets the TTL base to `now`, keeping the TTL duration.
    pub fn refresh(&mut self, now: u64) {
        self.touched = now;
    }

    /// Removes the TTL so the record never expires.
    pub fn persist(&mut self) {
        self.ttl_ms = None;
    }

    /// Re-arms the record with a new TTL counted from `now`.
    pub fn expire_in(&mut self, now: u64, ttl_ms: u64) {
        self.touched = now;
        self.ttl_ms = Some(ttl_ms);
    }
}
