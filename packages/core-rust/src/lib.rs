//! `CacheGrid` Core -- value model, cache records, and the clock abstraction.
//!
//! This crate provides the foundation layer for the `CacheGrid` cache
//! service:
//!
//! - **Types** ([`types`]): the [`Value`] payload enum
//! - **Record** ([`record`]): [`CacheRecord`] with TTL/expiry arithmetic
//! - **Clock** ([`clock`]): [`ClockSource`] trait and [`SystemClock`]

pub mod clock;
pub mod record;
pub mod types;

// Clock
pub use clock::{ClockSource, SystemClock};

// Record
pub use record::CacheRecord;

// Types
pub use types::Value;
