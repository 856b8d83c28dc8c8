//! Per-cache configuration.
//!
//! [`CacheOptions`] is built once through [`CacheOptionsBuilder`],
//! validated, and immutable afterwards. Everything the worker, janitor,
//! and hook tasks consult at runtime lives behind an `Arc` of this
//! struct.

use std::sync::Arc;

use cachegrid_core::{ClockSource, SystemClock, Value};

use crate::cluster::PeerNode;
use crate::error::CacheError;
use crate::hooks::HookSpec;

/// Default synchronous reply timeout in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 250;

/// Default per-hook event queue bound.
pub const DEFAULT_HOOK_QUEUE_CAPACITY: usize = 1024;

/// Default per-node replication ack timeout in milliseconds.
pub const DEFAULT_REPLICATION_ACK_TIMEOUT_MS: u64 = 5_000;

/// Fallback invoked on a miss: `(key, fallback_args) -> value`.
pub type Fallback = Arc<dyn Fn(&str, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Builds a [`Fallback`] from a plain closure.
pub fn fallback_fn(
    f: impl Fn(&str, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
) -> Fallback {
    Arc::new(f)
}

/// Validated, immutable configuration for one cache instance.
pub struct CacheOptions {
    /// Logical cache name, unique within the process registry.
    pub name: String,
    /// TTL applied to writes that do not specify one. `None` = no expiry.
    pub default_ttl_ms: Option<u64>,
    /// Janitor sweep interval. `None` = no janitor task.
    pub janitor_interval_ms: Option<u64>,
    /// Fallback consulted by `get` when the caller passes none.
    pub default_fallback: Option<Fallback>,
    /// Extra arguments handed to every fallback invocation.
    pub fallback_args: Vec<Value>,
    /// Peer nodes. Empty = non-replicated.
    pub nodes: Vec<Arc<dyn PeerNode>>,
    /// Acquire row locks on every write path.
    pub transactional: bool,
    /// Registered hooks, in registration order.
    pub hooks: Vec<HookSpec>,
    /// Register the built-in statistics post-hook.
    pub record_stats: bool,
    /// Synchronous reply timeout.
    pub call_timeout_ms: u64,
    /// Bound for each hook's event queue.
    pub hook_queue_capacity: usize,
    /// Per-node ack timeout for replication broadcasts.
    pub replication_ack_timeout_ms: u64,
    /// Time source for all TTL arithmetic.
    pub clock: Arc<dyn ClockSource>,
}

impl CacheOptions {
    /// Starts a builder for a cache with the given name.
    pub fn builder(name: impl Into<String>) -> CacheOptionsBuilder {
        CacheOptionsBuilder::new(name)
    }

    /// `true` when mutations must be replicated to peer nodes.
    #[must_use]
    pub fn remote(&self) -> bool {
        !self.nodes.is_empty()
    }
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("name", &self.name)
            .field("default_ttl_ms", &self.default_ttl_ms)
            .field("janitor_interval_ms", &self.janitor_interval_ms)
            .field("has_default_fallback", &self.default_fallback.is_some())
            .field("fallback_args", &self.fallback_args.len())
            .field(
                "nodes",
                &self
                    .nodes
                    .iter()
                    .map(|n| n.node_id().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("transactional", &self.transactional)
            .field("hooks", &self.hooks.len())
            .field("record_stats", &self.record_stats)
            .field("call_timeout_ms", &self.call_timeout_ms)
            .field("hook_queue_capacity", &self.hook_queue_capacity)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CacheOptions`]; `build` validates.
pub struct CacheOptionsBuilder {
    name: String,
    default_ttl_ms: Option<u64>,
    janitor_interval_ms: Option<u64>,
    default_fallback: Option<Fallback>,
    fallback_args: Vec<Value>,
    nodes: Vec<Arc<dyn PeerNode>>,
    transactional: bool,
    hooks: Vec<HookSpec>,
    record_stats: bool,
    call_timeout_ms: u64,
    hook_queue_capacity: usize,
    replication_ack_timeout_ms: u64,
    clock: Arc<dyn ClockSource>,
}

impl CacheOptionsBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_ttl_ms: None,
            janitor_interval_ms: None,
            default_fallback: None,
            fallback_args: Vec::new(),
            nodes: Vec::new(),
            transactional: false,
            hooks: Vec::new(),
            record_stats: false,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            hook_queue_capacity: DEFAULT_HOOK_QUEUE_CAPACITY,
            replication_ack_timeout_ms: DEFAULT_REPLICATION_ACK_TIMEOUT_MS,
            clock: Arc::new(SystemClock),
        }
    }

    /// TTL applied to writes that do not specify one.
    #[must_use]
    pub fn default_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.default_ttl_ms = Some(ttl_ms);
        self
    }

    /// Enables the janitor with the given sweep interval.
    #[must_use]
    pub fn janitor_interval_ms(mut self, interval_ms: u64) -> Self {
        self.janitor_interval_ms = Some(interval_ms);
        self
    }

    /// Fallback consulted on every miss without a per-call fallback.
    #[must_use]
    pub fn default_fallback(mut self, fallback: Fallback) -> Self {
        self.default_fallback = Some(fallback);
        self
    }

    /// Extra arguments handed to every fallback invocation.
    #[must_use]
    pub fn fallback_args(mut self, args: Vec<Value>) -> Self {
        self.fallback_args = args;
        self
    }

    /// Adds a peer node; any peer makes the cache replicated.
    #[must_use]
    pub fn node(mut self, node: Arc<dyn PeerNode>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Acquire row locks on every write path.
    #[must_use]
    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Registers a hook. Registration order is dispatch order.
    #[must_use]
    pub fn hook(mut self, spec: HookSpec) -> Self {
        self.hooks.push(spec);
        self
    }

    /// Registers the built-in statistics post-hook.
    #[must_use]
    pub fn record_stats(mut self, record_stats: bool) -> Self {
        self.record_stats = record_stats;
        self
    }

    /// Synchronous reply timeout.
    #[must_use]
    pub fn call_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }

    /// Bound for each hook's event queue.
    #[must_use]
    pub fn hook_queue_capacity(mut self, capacity: usize) -> Self {
        self.hook_queue_capacity = capacity;
        self
    }

    /// Per-node ack timeout for replication broadcasts.
    #[must_use]
    pub fn replication_ack_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.replication_ack_timeout_ms = timeout_ms;
        self
    }

    /// Replaces the time source (tests inject a manual clock here).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates and freezes the options.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidOption`] when the name is empty, an interval
    /// or timeout is zero, or the hook queue bound is zero.
    pub fn build(self) -> Result<CacheOptions, CacheError> {
        if self.name.trim().is_empty() {
            return Err(CacheError::InvalidOption {
                reason: "cache name must not be empty".to_string(),
            });
        }
        if self.janitor_interval_ms == Some(0) {
            return Err(CacheError::InvalidOption {
                reason: "janitor interval must be positive".to_string(),
            });
        }
        if self.call_timeout_ms == 0 {
            return Err(CacheError::InvalidOption {
                reason: "call timeout must be positive".to_string(),
            });
        }
        if self.hook_queue_capacity == 0 {
            return Err(CacheError::InvalidOption {
                reason: "hook queue capacity must be positive".to_string(),
            });
        }
        if self.replication_ack_timeout_ms == 0 {
            return Err(CacheError::InvalidOption {
                reason: "replication ack timeout must be positive".to_string(),
            });
        }

        Ok(CacheOptions {
            name: self.name,
            default_ttl_ms: self.default_ttl_ms,
            janitor_interval_ms: self.janitor_interval_ms,
            default_fallback: self.default_fallback,
            fallback_args: self.fallback_args,
            nodes: self.nodes,
            transactional: self.transactional,
            hooks: self.hooks,
            record_stats: self.record_stats,
            call_timeout_ms: self.call_timeout_ms,
            hook_queue_capacity: self.hook_queue_capacity,
            replication_ack_timeout_ms: self.replication_ack_timeout_ms,
            clock: self.clock,
        })
    }
}
