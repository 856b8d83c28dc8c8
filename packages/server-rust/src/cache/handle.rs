//! The public cache handle.
//!
//! [`Cache::start`] wires up one cache instance -- storage engine, hook
//! tasks, optional replicator and janitor, and the worker under a
//! one-for-one supervision loop -- and returns a cheaply cloneable
//! handle. Synchronous calls await the worker's reply under the
//! configured call timeout; fire-and-forget mutations enqueue and return
//! a sentinel immediately.

use std::sync::Arc;
use std::time::Duration;

use cachegrid_core::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::cache::janitor::Janitor;
use crate::cache::options::CacheOptions;
use crate::cache::request::{
    Command, Envelope, GetOptions, IncrOptions, Lookup, MutationOptions, Origin, Reply, TtlStatus,
    WriteOptions,
};
use crate::cache::worker::Worker;
use crate::cluster::Replicator;
use crate::error::CacheError;
use crate::hooks::{HookDispatcher, HookSpec, StatsHook, StatsSnapshot};
use crate::storage::{DashMapStorage, StorageEngine};

/// Bound of the worker's request inbox.
const WORKER_QUEUE_CAPACITY: usize = 1024;

struct CacheShared {
    options: Arc<CacheOptions>,
    tx: mpsc::Sender<Envelope>,
    stop: watch::Sender<bool>,
    hooks: Arc<HookDispatcher>,
}

/// Handle to a running cache instance. Clone freely; all clones address
/// the same worker.
#[derive(Clone)]
pub struct Cache {
    shared: Arc<CacheShared>,
}

impl Cache {
    /// Starts a cache instance from validated options.
    ///
    /// Spawns the worker (supervised), the janitor when an interval is
    /// configured (supervised), and one dispatch task per hook. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Currently none beyond what [`CacheOptions`] validation already
    /// rejected; the `Result` keeps room for startup failures of future
    /// storage backends.
    pub fn start(options: CacheOptions) -> Result<Self, CacheError> {
        let options = Arc::new(options);
        let engine: Arc<dyn StorageEngine> = Arc::new(DashMapStorage::new());
        let (stop, _) = watch::channel(false);

        // The stats hook is appended after user hooks so user post-hooks
        // observe events before the counters fold them in.
        let stats = options.record_stats.then(|| Arc::new(StatsHook::new()));
        let mut specs = options.hooks.clone();
        if let Some(stats) = &stats {
            specs.push(HookSpec::post(Arc::clone(stats) as Arc<dyn crate::hooks::CacheHook>));
        }
        let hooks = Arc::new(HookDispatcher::spawn(
            &specs,
            options.hook_queue_capacity,
            &stop,
        ));

        let replicator = options.remote().then(|| {
            Arc::new(Replicator::new(
                options.nodes.clone(),
                options.replication_ack_timeout_ms,
            ))
        });

        let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
        let inbox = Arc::new(Mutex::new(rx));

        let worker = Arc::new(Worker::new(
            Arc::clone(&options),
            Arc::clone(&engine),
            Arc::clone(&hooks),
            replicator,
            stats,
            inbox,
            stop.subscribe(),
        ));
        spawn_supervised("worker", options.name.clone(), stop.subscribe(), move || {
            Arc::clone(&worker).run()
        });

        if let Some(interval_ms) = options.janitor_interval_ms {
            let janitor_tx = tx.clone();
            let janitor_stop = stop.subscribe();
            spawn_supervised("janitor", options.name.clone(), stop.subscribe(), move || {
                Janitor::new(janitor_tx.clone(), interval_ms, janitor_stop.clone()).run()
            });
        }

        tracing::info!(
            cache = %options.name,
            remote = options.remote(),
            janitor = options.janitor_interval_ms.is_some(),
            "cache started"
        );

        Ok(Self {
            shared: Arc::new(CacheShared {
                options,
                tx,
                stop,
                hooks,
            }),
        })
    }

    /// Logical name of this cache.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.options.name
    }

    /// Signals the worker, janitor, and hook tasks to stop.
    ///
    /// Already-enqueued commands (fire-and-forget ones included) are
    /// drained before the worker exits; subsequent calls on any clone of
    /// this handle fail with [`CacheError::Stopped`].
    pub fn stop(&self) {
        let _ = self.shared.stop.send(true);
        tracing::info!(cache = %self.name(), "cache stopping");
    }

    // --- Reads ---

    /// Looks up `key`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Timeout`], [`CacheError::Stopped`], or
    /// [`CacheError::FallbackFailed`] when a default fallback fires and
    /// fails.
    pub async fn get(&self, key: impl Into<String>) -> Result<Lookup, CacheError> {
        self.get_with(key, GetOptions::default()).await
    }

    /// Looks up `key` with a per-call fallback.
    ///
    /// # Errors
    ///
    /// As [`Cache::get`].
    pub async fn get_with(
        &self,
        key: impl Into<String>,
        options: GetOptions,
    ) -> Result<Lookup, CacheError> {
        let reply = self
            .call(Command::Get {
                key: key.into(),
                fallback: options.fallback,
            })
            .await?;
        match reply {
            Reply::Fetched(lookup) => Ok(lookup),
            other => unreachable!("get replied {other:?}"),
        }
    }

    /// Reads (fallback respected), applies `update`, writes back without
    /// refreshing the TTL base.
    ///
    /// # Errors
    ///
    /// As [`Cache::get`], plus [`CacheError::UpdateFailed`] when the
    /// `update` closure panics.
    pub async fn get_and_update(
        &self,
        key: impl Into<String>,
        update: impl FnOnce(Option<&Value>) -> Value + Send + 'static,
    ) -> Result<(Origin, Value), CacheError> {
        self.get_and_update_with(key, update, GetOptions::default())
            .await
    }

    /// [`Cache::get_and_update`] with a per-call fallback.
    ///
    /// # Errors
    ///
    /// As [`Cache::get_and_update`].
    pub async fn get_and_update_with(
        &self,
        key: impl Into<String>,
        update: impl FnOnce(Option<&Value>) -> Value + Send + 'static,
        options: GetOptions,
    ) -> Result<(Origin, Value), CacheError> {
        let reply = self
            .call(Command::GetAndUpdate {
                key: key.into(),
                update: Box::new(update),
                fallback: options.fallback,
            })
            .await?;
        match reply {
            Reply::Updated(origin, value) => Ok((origin, value)),
            other => unreachable!("get_and_update replied {other:?}"),
        }
    }

    /// Remaining TTL of `key`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Timeout`] or [`CacheError::Stopped`].
    pub async fn ttl(&self, key: impl Into<String>) -> Result<TtlStatus, CacheError> {
        match self.call(Command::Ttl { key: key.into() }).await? {
            Reply::Ttl(status) => Ok(status),
            other => unreachable!("ttl replied {other:?}"),
        }
    }

    /// Record count, logically expired records included.
    ///
    /// # Errors
    ///
    /// [`CacheError::Timeout`] or [`CacheError::Stopped`].
    pub async fn size(&self) -> Result<usize, CacheError> {
        match self.call(Command::Size).await? {
            Reply::Count(n) => Ok(n),
            other => unreachable!("size replied {other:?}"),
        }
    }

    /// Record count after filtering logically expired records (O(n) scan).
    ///
    /// # Errors
    ///
    /// [`CacheError::Timeout`] or [`CacheError::Stopped`].
    pub async fn count(&self) -> Result<usize, CacheError> {
        match self.call(Command::Count).await? {
            Reply::Count(n) => Ok(n),
            other => unreachable!("count replied {other:?}"),
        }
    }

    /// Unordered keys, logically expired records included.
    ///
    /// # Errors
    ///
    /// [`CacheError::Timeout`] or [`CacheError::Stopped`].
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        match self.call(Command::Keys).await? {
            Reply::Keys(keys) => Ok(keys),
            other => unreachable!("keys replied {other:?}"),
        }
    }

    /// `true` when the cache holds no records at all.
    ///
    /// # Errors
    ///
    /// [`CacheError::Timeout`] or [`CacheError::Stopped`].
    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        match self.call(Command::IsEmpty).await? {
            Reply::Flag(flag) => Ok(flag),
            other => unreachable!("is_empty replied {other:?}"),
        }
    }

    /// `true` when `key` holds a live (non-expired) record.
    ///
    /// # Errors
    ///
    /// [`CacheError::Timeout`] or [`CacheError::Stopped`].
    pub async fn exists(&self, key: impl Into<String>) -> Result<bool, CacheError> {
        match self.call(Command::Exists { key: key.into() }).await? {
            Reply::Flag(flag) => Ok(flag),
            other => unreachable!("exists replied {other:?}"),
        }
    }

    /// Statistics snapshot.
    ///
    /// # Errors
    ///
    /// [`CacheError::StatsNotEnabled`] when the cache was started without
    /// `record_stats`; otherwise [`CacheError::Timeout`] or
    /// [`CacheError::Stopped`].
    pub async fn stats(&self) -> Result<StatsSnapshot, CacheError> {
        match self.call(Command::Stats).await? {
            Reply::Stats(snapshot) => Ok(snapshot),
            other => unreachable!("stats replied {other:?}"),
        }
    }

    /// Per-hook count of events dropped to queue overflow.
    #[must_use]
    pub fn hook_drop_counts(&self) -> Vec<(&'static str, u64)> {
        self.shared.hooks.dropped_events()
    }

    // --- Mutations ---

    /// Writes `value` under `key`, overwriting unconditionally.
    ///
    /// # Errors
    ///
    /// [`CacheError::Timeout`], [`CacheError::Stopped`], or
    /// [`CacheError::ReplicationFailed`] in remote mode.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: Value,
        options: WriteOptions,
    ) -> Result<bool, CacheError> {
        let command = Command::Set {
            key: key.into(),
            value,
            ttl_ms: options.ttl_ms,
        };
        if options.asynchronous {
            self.cast(command).await?;
            return Ok(true);
        }
        match self.call(command).await? {
            Reply::Wrote(wrote) => Ok(wrote),
            other => unreachable!("set replied {other:?}"),
        }
    }

    /// Writes every pair, worker-atomically. Returns the pair count, or
    /// the sentinel `0` in fire-and-forget mode.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn set_many(
        &self,
        pairs: Vec<(String, Value)>,
        options: WriteOptions,
    ) -> Result<usize, CacheError> {
        let command = Command::SetMany {
            pairs,
            ttl_ms: options.ttl_ms,
        };
        if options.asynchronous {
            self.cast(command).await?;
            return Ok(0);
        }
        match self.call(command).await? {
            Reply::Count(n) => Ok(n),
            other => unreachable!("set_many replied {other:?}"),
        }
    }

    /// Overwrites the value under `key` only; `touched` and TTL keep
    /// their current values. Returns `false` when the key is missing.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn update(
        &self,
        key: impl Into<String>,
        value: Value,
        options: MutationOptions,
    ) -> Result<bool, CacheError> {
        let command = Command::Update {
            key: key.into(),
            value,
        };
        self.wrote(command, options).await
    }

    /// Removes `key`. Succeeds whether or not the key was present.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn del(
        &self,
        key: impl Into<String>,
        options: MutationOptions,
    ) -> Result<bool, CacheError> {
        self.wrote(Command::Del { key: key.into() }, options).await
    }

    /// Removes every record. Returns the removed count, or the sentinel
    /// `0` in fire-and-forget mode (no reply channel carries the count).
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn clear(&self, options: MutationOptions) -> Result<usize, CacheError> {
        if options.asynchronous {
            self.cast(Command::Clear).await?;
            return Ok(0);
        }
        match self.call(Command::Clear).await? {
            Reply::Count(n) => Ok(n),
            other => unreachable!("clear replied {other:?}"),
        }
    }

    /// Atomically removes and returns the live value under `key`.
    /// Fire-and-forget mode discards the value and returns `None`.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn take(
        &self,
        key: impl Into<String>,
        options: MutationOptions,
    ) -> Result<Option<Value>, CacheError> {
        let command = Command::Take { key: key.into() };
        if options.asynchronous {
            self.cast(command).await?;
            return Ok(None);
        }
        match self.call(command).await? {
            Reply::Taken(value) => Ok(value),
            other => unreachable!("take replied {other:?}"),
        }
    }

    /// Adds `options.amount` to the integer under `key`, initialising a
    /// missing key to `options.initial` first. Returns the new value, or
    /// the sentinel `0` in fire-and-forget mode.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotANumber`] on a non-integer value; otherwise as
    /// [`Cache::set`].
    pub async fn incr(
        &self,
        key: impl Into<String>,
        options: IncrOptions,
    ) -> Result<i64, CacheError> {
        self.step(key.into(), options.amount, options, "incr").await
    }

    /// [`Cache::incr`] with the amount negated.
    ///
    /// # Errors
    ///
    /// As [`Cache::incr`].
    pub async fn decr(
        &self,
        key: impl Into<String>,
        options: IncrOptions,
    ) -> Result<i64, CacheError> {
        let amount = options.amount.saturating_neg();
        self.step(key.into(), amount, options, "decr").await
    }

    /// Re-arms `key` to expire `ttl_ms` from now; non-positive values
    /// evict immediately. Returns `false` when the key is missing.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn expire(
        &self,
        key: impl Into<String>,
        ttl_ms: i64,
        options: MutationOptions,
    ) -> Result<bool, CacheError> {
        let command = Command::Expire {
            key: key.into(),
            ttl_ms,
        };
        self.wrote(command, options).await
    }

    /// Re-arms `key` to expire at the absolute timestamp `at_ms`;
    /// deadlines at or before now evict immediately.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn expire_at(
        &self,
        key: impl Into<String>,
        at_ms: u64,
        options: MutationOptions,
    ) -> Result<bool, CacheError> {
        let command = Command::ExpireAt {
            key: key.into(),
            at_ms,
        };
        self.wrote(command, options).await
    }

    /// Clears the TTL so `key` never expires.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn persist(
        &self,
        key: impl Into<String>,
        options: MutationOptions,
    ) -> Result<bool, CacheError> {
        self.wrote(Command::Persist { key: key.into() }, options).await
    }

    /// Resets the TTL base of `key` to now, keeping the TTL duration.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn refresh(
        &self,
        key: impl Into<String>,
        options: MutationOptions,
    ) -> Result<bool, CacheError> {
        self.wrote(Command::Refresh { key: key.into() }, options).await
    }

    /// Synchronously sweeps all logically expired records. Returns the
    /// eviction count, or the sentinel `0` in fire-and-forget mode.
    ///
    /// # Errors
    ///
    /// As [`Cache::set`].
    pub async fn purge(&self, options: MutationOptions) -> Result<usize, CacheError> {
        if options.asynchronous {
            self.cast(Command::Purge).await?;
            return Ok(0);
        }
        match self.call(Command::Purge).await? {
            Reply::Count(n) => Ok(n),
            other => unreachable!("purge replied {other:?}"),
        }
    }

    // --- Plumbing ---

    async fn step(
        &self,
        key: String,
        amount: i64,
        options: IncrOptions,
        verb: &'static str,
    ) -> Result<i64, CacheError> {
        let command = Command::Incr {
            key,
            amount,
            initial: options.initial,
            verb,
        };
        if options.asynchronous {
            self.cast(command).await?;
            return Ok(0);
        }
        match self.call(command).await? {
            Reply::Int(value) => Ok(value),
            other => unreachable!("{verb} replied {other:?}"),
        }
    }

    async fn wrote(
        &self,
        command: Command,
        options: MutationOptions,
    ) -> Result<bool, CacheError> {
        if options.asynchronous {
            self.cast(command).await?;
            return Ok(true);
        }
        match self.call(command).await? {
            Reply::Wrote(wrote) => Ok(wrote),
            other => unreachable!("mutation replied {other:?}"),
        }
    }

    /// Synchronous round-trip under the configured call timeout. The
    /// worker keeps executing a timed-out request; only the reply is
    /// abandoned.
    async fn call(&self, command: Command) -> Result<Reply, CacheError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .tx
            .send(Envelope {
                command,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| CacheError::Stopped)?;

        let timeout_ms = self.shared.options.call_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_recv)) => Err(CacheError::Stopped),
            Err(_elapsed) => Err(CacheError::Timeout { timeout_ms }),
        }
    }

    /// Fire-and-forget enqueue.
    async fn cast(&self, command: Command) -> Result<(), CacheError> {
        self.shared
            .tx
            .send(Envelope {
                command,
                reply: None,
            })
            .await
            .map_err(|_| CacheError::Stopped)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name())
            .field("remote", &self.shared.options.remote())
            .finish_non_exhaustive()
    }
}

/// One-for-one supervision: respawn `factory`'s task after a panic,
/// stop respawning once the cache is stopping or the task exits cleanly.
fn spawn_supervised<F, Fut>(
    task: &'static str,
    cache: String,
    stop: watch::Receiver<bool>,
    factory: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let handle = tokio::spawn(factory());
            match handle.await {
                Ok(()) => break,
                Err(err) if err.is_panic() => {
                    tracing::error!(cache = %cache, task, "supervised task panicked, restarting");
                    if *stop.borrow() {
                        break;
                    }
                }
                Err(_cancelled) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cache::options::fallback_fn;

    #[tokio::test]
    async fn start_set_get_round_trip() {
        let cache = Cache::start(CacheOptions::builder("handle-basic").build().unwrap()).unwrap();

        assert!(cache
            .set("k", Value::from("v"), WriteOptions::default())
            .await
            .unwrap());
        let lookup = cache.get("k").await.unwrap();
        assert_eq!(lookup, Lookup::Hit(Value::from("v")));

        cache.stop();
    }

    #[tokio::test]
    async fn async_set_is_eventually_visible() {
        let cache = Cache::start(CacheOptions::builder("handle-async").build().unwrap()).unwrap();

        assert!(cache
            .set("k", Value::Int(1), WriteOptions::fire_and_forget())
            .await
            .unwrap());

        // A later synchronous call is processed after the queued write.
        let lookup = cache.get("k").await.unwrap();
        assert_eq!(lookup, Lookup::Hit(Value::Int(1)));

        cache.stop();
    }

    #[tokio::test]
    async fn async_clear_returns_sentinel_zero() {
        let cache = Cache::start(CacheOptions::builder("handle-clear").build().unwrap()).unwrap();
        cache
            .set("k", Value::Int(1), WriteOptions::default())
            .await
            .unwrap();

        let count = cache.clear(MutationOptions::fire_and_forget()).await.unwrap();
        assert_eq!(count, 0);

        // The clear did happen.
        assert!(cache.is_empty().await.unwrap());
        cache.stop();
    }

    #[tokio::test]
    async fn calls_after_stop_report_stopped() {
        let cache = Cache::start(CacheOptions::builder("handle-stop").build().unwrap()).unwrap();
        cache
            .set("k", Value::Int(1), WriteOptions::default())
            .await
            .unwrap();

        cache.stop();
        // Give the worker a moment to drain and drop the receiver.
        let mut stopped = false;
        for _ in 0..1_000 {
            match cache.get("k").await {
                Err(CacheError::Stopped) => {
                    stopped = true;
                    break;
                }
                _ => tokio::task::yield_now().await,
            }
        }
        assert!(stopped, "cache should refuse calls after stop");
    }

    #[tokio::test]
    async fn clones_address_the_same_worker() {
        let cache = Cache::start(CacheOptions::builder("handle-clone").build().unwrap()).unwrap();
        let clone = cache.clone();

        clone
            .set("shared", Value::Int(7), WriteOptions::default())
            .await
            .unwrap();
        let lookup = cache.get("shared").await.unwrap();
        assert_eq!(lookup, Lookup::Hit(Value::Int(7)));

        cache.stop();
    }

    #[tokio::test]
    async fn decr_negates_the_amount() {
        let cache = Cache::start(CacheOptions::builder("handle-decr").build().unwrap()).unwrap();
        cache
            .set("n", Value::Int(10), WriteOptions::default())
            .await
            .unwrap();

        let value = cache.decr("n", IncrOptions::by(3)).await.unwrap();
        assert_eq!(value, 7);

        cache.stop();
    }

    #[tokio::test]
    async fn fallback_fn_builds_usable_fallback() {
        let cache = Cache::start(CacheOptions::builder("handle-fb").build().unwrap()).unwrap();

        let lookup = cache
            .get_with(
                "absent",
                GetOptions {
                    fallback: Some(fallback_fn(|key, _| Ok(Value::from(key)))),
                },
            )
            .await
            .unwrap();
        assert_eq!(lookup, Lookup::Loaded(Value::from("absent")));

        cache.stop();
    }

    #[tokio::test]
    async fn supervised_task_restarts_after_panic() {
        let attempts = Arc::new(AtomicU32::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);

        {
            let attempts = Arc::clone(&attempts);
            spawn_supervised("test-task", "test".to_string(), stop_rx, move || {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first run dies");
                    }
                }
            });
        }

        for _ in 0..10_000 {
            if attempts.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        drop(stop_tx);
    }
}
