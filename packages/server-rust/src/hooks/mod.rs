//! Hook interface and registration types.
//!
//! Hooks are ordered observers of cache actions. A pre-hook sees the
//! incoming action descriptor before the worker executes it; a post-hook
//! additionally sees a summary of the result. Both are observational:
//! hooks cannot modify the request or the reply, and the client never
//! waits on hook delivery.

pub mod dispatcher;
pub mod stats;

use std::sync::Arc;

pub use dispatcher::HookDispatcher;
pub use stats::{StatsHook, StatsSnapshot};

/// Whether a hook observes actions before or after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Receives the action descriptor before the worker executes it.
    Pre,
    /// Receives the action descriptor and result summary after execution.
    Post,
}

/// Descriptor of an incoming cache action, delivered to hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEvent {
    /// Operation name, e.g. `"get"`, `"set"`, `"purge"`.
    pub action: &'static str,
    /// Key the action targets, when it targets a single key.
    pub key: Option<String>,
}

/// Result summary delivered to post-hooks alongside the [`ActionEvent`].
///
/// Deliberately payload-free: hooks observing values would force a clone
/// of every payload onto every hook queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A read found a live record.
    Hit,
    /// A read found nothing (and no fallback produced a value).
    Miss,
    /// A read missed and the fallback loaded a value.
    Loaded,
    /// A mutation wrote a record.
    Written,
    /// A mutation targeted an absent key and wrote nothing.
    Missing,
    /// `take` removed and returned a live record.
    Taken,
    /// Entries were removed (`del`, `clear`).
    Removed(u64),
    /// Logically expired entries were swept (`purge`).
    Expired(u64),
    /// The action only observed state (`size`, `keys`, `ttl`, ...).
    Info,
    /// The action failed; carries the error kind.
    Failed(&'static str),
}

/// Capability interface implemented by cache observers.
///
/// State belongs inside the implementation (atomics, mutexes); the
/// dispatcher calls these methods from the hook's own task, one event at
/// a time in delivery order. Default bodies let pre-only hooks implement
/// just [`CacheHook::on_action`] and post-only hooks just
/// [`CacheHook::on_result`].
pub trait CacheHook: Send + Sync + 'static {
    /// Stable name used in logs and drop-count reporting.
    fn name(&self) -> &'static str;

    /// Pre-execution notification.
    fn on_action(&self, event: &ActionEvent) {
        let _ = event;
    }

    /// Post-execution notification.
    fn on_result(&self, event: &ActionEvent, outcome: &Outcome) {
        let _ = (event, outcome);
    }
}

/// A hook instance paired with its dispatch kind.
#[derive(Clone)]
pub struct HookSpec {
    /// The observer instance.
    pub hook: Arc<dyn CacheHook>,
    /// Pre or post dispatch.
    pub kind: HookKind,
}

impl HookSpec {
    /// Registers `hook` as a pre-hook.
    #[must_use]
    pub fn pre(hook: Arc<dyn CacheHook>) -> Self {
        Self {
            hook,
            kind: HookKind::Pre,
        }
    }

    /// Registers `hook` as a post-hook.
    #[must_use]
    pub fn post(hook: Arc<dyn CacheHook>) -> Self {
        Self {
            hook,
            kind: HookKind::Post,
        }
    }
}

impl std::fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSpec")
            .field("hook", &self.hook.name())
            .field("kind", &self.kind)
            .finish()
    }
}
