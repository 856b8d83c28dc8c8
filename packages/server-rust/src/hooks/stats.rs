//! Built-in statistics hook.
//!
//! Registered automatically as a post-hook when `record_stats` is set.
//! Folds [`Outcome`] summaries into atomic counters; `stats()` returns a
//! point-in-time [`StatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use cachegrid_core::{ClockSource, SystemClock};

use super::{ActionEvent, CacheHook, Outcome};

/// Point-in-time copy of the statistics counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total actions observed.
    pub op_count: u64,
    /// Alias of `op_count`, kept for callers thinking in requests.
    pub request_count: u64,
    /// Reads that found a live record (includes `exists` and `take` hits).
    pub hit_count: u64,
    /// Reads that found nothing. A fallback load counts the miss too.
    pub miss_count: u64,
    /// Values produced by fallback loads.
    pub load_count: u64,
    /// Records written by mutations.
    pub set_count: u64,
    /// Entries removed by `del`, `take`, and `clear`.
    pub eviction_count: u64,
    /// Logically expired entries swept by `purge` (janitor included).
    pub expired_count: u64,
    /// Wall-clock ms when the hook was created.
    pub creation_date: u64,
}

impl StatsSnapshot {
    /// Hit rate over all hits and misses, `1.0` when nothing was read yet.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hit_count + self.miss_count;
        if reads == 0 {
            1.0
        } else {
            self.hit_count as f64 / reads as f64
        }
    }
}

/// Post-hook that counts cache activity.
pub struct StatsHook {
    creation_date: u64,
    op_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    load_count: AtomicU64,
    set_count: AtomicU64,
    eviction_count: AtomicU64,
    expired_count: AtomicU64,
}

impl StatsHook {
    /// Creates a hook stamped with the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_creation_date(SystemClock.now())
    }

    /// Creates a hook with an explicit creation timestamp (tests).
    #[must_use]
    pub fn with_creation_date(creation_date: u64) -> Self {
        Self {
            creation_date,
            op_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            load_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Copies the counters out.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let op_count = self.op_count.load(Ordering::Relaxed);
        StatsSnapshot {
            op_count,
            request_count: op_count,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            load_count: self.load_count.load(Ordering::Relaxed),
            set_count: self.set_count.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            expired_count: self.expired_count.load(Ordering::Relaxed),
            creation_date: self.creation_date,
        }
    }
}

impl Default for StatsHook {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheHook for StatsHook {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn on_result(&self, _event: &ActionEvent, outcome: &Outcome) {
        self.op_count.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Hit => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Miss => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Loaded => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                self.load_count.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Written => {
                self.set_count.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Taken => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                self.eviction_count.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Removed(n) => {
                self.eviction_count.fetch_add(*n, Ordering::Relaxed);
            }
            Outcome::Expired(n) => {
                self.expired_count.fetch_add(*n, Ordering::Relaxed);
            }
            Outcome::Missing | Outcome::Info | Outcome::Failed(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ActionEvent {
        ActionEvent {
            action: "test",
            key: None,
        }
    }

    #[test]
    fn counters_start_at_zero() {
        let hook = StatsHook::with_creation_date(42);
        let snap = hook.snapshot();
        assert_eq!(snap.op_count, 0);
        assert_eq!(snap.request_count, 0);
        assert_eq!(snap.hit_count, 0);
        assert_eq!(snap.creation_date, 42);
    }

    #[test]
    fn outcomes_fold_into_counters() {
        let hook = StatsHook::with_creation_date(0);

        hook.on_result(&event(), &Outcome::Hit);
        hook.on_result(&event(), &Outcome::Miss);
        hook.on_result(&event(), &Outcome::Loaded);
        hook.on_result(&event(), &Outcome::Written);
        hook.on_result(&event(), &Outcome::Taken);
        hook.on_result(&event(), &Outcome::Removed(3));
        hook.on_result(&event(), &Outcome::Expired(2));
        hook.on_result(&event(), &Outcome::Info);
        hook.on_result(&event(), &Outcome::Failed("timeout"));

        let snap = hook.snapshot();
        assert_eq!(snap.op_count, 9);
        assert_eq!(snap.request_count, 9);
        assert_eq!(snap.hit_count, 2); // Hit + Taken
        assert_eq!(snap.miss_count, 2); // Miss + Loaded
        assert_eq!(snap.load_count, 1);
        assert_eq!(snap.set_count, 1);
        assert_eq!(snap.eviction_count, 4); // Taken + Removed(3)
        assert_eq!(snap.expired_count, 2);
    }

    #[test]
    fn hit_rate_over_reads() {
        let hook = StatsHook::with_creation_date(0);
        assert!((hook.snapshot().hit_rate() - 1.0).abs() < f64::EPSILON);

        hook.on_result(&event(), &Outcome::Hit);
        hook.on_result(&event(), &Outcome::Hit);
        hook.on_result(&event(), &Outcome::Hit);
        hook.on_result(&event(), &Outcome::Miss);

        assert!((hook.snapshot().hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn stats_hook_creation_date_is_wall_clock() {
        let hook = StatsHook::new();
        assert!(hook.snapshot().creation_date > 0);
    }
}
