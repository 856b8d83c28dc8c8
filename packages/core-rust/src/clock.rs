//! Millisecond clock abstraction for TTL arithmetic.
//!
//! Every expiry decision in the cache reads time through [`ClockSource`],
//! so tests can drive deadlines deterministically by injecting a fixed
//! clock instead of sleeping.

use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over the system clock for dependency injection.
///
/// Returns milliseconds since the Unix epoch. Implementations must be
/// monotonic enough for TTL math: a later call never returns a smaller
/// value than an earlier one on the same source.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now(&self) -> u64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> u64 {
        // Millisecond timestamps fit in u64 until long after the heat death
        // of any deployment this code will see.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
