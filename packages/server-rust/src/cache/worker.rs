//! The serialising worker that owns one cache instance.
//!
//! All API calls arrive as [`Envelope`]s on the worker's inbox and are
//! processed strictly in FIFO order, so the sequence of accepted
//! mutations forms a total order observed by every later read and by the
//! hook stream. Reads that observe a logically expired record evict it
//! before reporting a miss.
//!
//! In remote mode every mutation is additionally broadcast to the peer
//! nodes; in transactional mode row locks are taken (locally and on all
//! peers) around each write.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use cachegrid_core::{CacheRecord, Value};
use tokio::sync::{mpsc, watch, Mutex};

use crate::cache::options::{CacheOptions, Fallback};
use crate::cache::request::{Command, Envelope, Lookup, Origin, Reply, TtlStatus, UpdateFn};
use crate::cluster::{normalise_keys, Mutation, Replicator, RowLockManager};
use crate::error::CacheError;
use crate::hooks::{ActionEvent, HookDispatcher, Outcome, StatsHook};
use crate::storage::StorageEngine;

/// Shared inbox type: survives worker restarts because the supervisor
/// keeps the `Arc` while each worker incarnation only locks it.
pub(crate) type Inbox = Arc<Mutex<mpsc::Receiver<Envelope>>>;

/// Per-cache request processor.
///
/// Cheap to share: every field is behind an `Arc`, so the supervision
/// loop can respawn `run` on the same state after a panic.
pub(crate) struct Worker {
    options: Arc<CacheOptions>,
    engine: Arc<dyn StorageEngine>,
    hooks: Arc<HookDispatcher>,
    replicator: Option<Arc<Replicator>>,
    stats: Option<Arc<StatsHook>>,
    locks: Arc<RowLockManager>,
    inbox: Inbox,
    stop: watch::Receiver<bool>,
}

impl Worker {
    pub(crate) fn new(
        options: Arc<CacheOptions>,
        engine: Arc<dyn StorageEngine>,
        hooks: Arc<HookDispatcher>,
        replicator: Option<Arc<Replicator>>,
        stats: Option<Arc<StatsHook>>,
        inbox: Inbox,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            options,
            engine,
            hooks,
            replicator,
            stats,
            locks: Arc::new(RowLockManager::new()),
            inbox,
            stop,
        }
    }

    /// Processes envelopes until the channel closes or stop is signalled.
    ///
    /// On stop, already-enqueued envelopes are drained before exiting so
    /// fire-and-forget mutations issued before `stop` still take effect.
    pub(crate) async fn run(self: Arc<Self>) {
        let mut stop = self.stop.clone();
        loop {
            let envelope = {
                let mut inbox = self.inbox.lock().await;
                if *stop.borrow() {
                    inbox.try_recv().ok()
                } else {
                    let received = tokio::select! {
                        env = inbox.recv() => Some(env),
                        _ = stop.changed() => None,
                    };
                    match received {
                        Some(env) => env,
                        // Stop signalled: drain what is already enqueued.
                        None => inbox.try_recv().ok(),
                    }
                }
            };
            match envelope {
                Some(envelope) => self.process(envelope).await,
                None => break,
            }
        }
        tracing::debug!(cache = %self.options.name, "cache worker stopped");
    }

    /// Runs one envelope through pre-hooks, execution, and post-hooks.
    pub(crate) async fn process(&self, envelope: Envelope) {
        let event = ActionEvent {
            action: envelope.command.action(),
            key: envelope.command.key().map(str::to_string),
        };
        self.hooks.dispatch_pre(&event);

        let result = self.handle(envelope.command).await;
        if let Err(err) = &result {
            tracing::debug!(
                cache = %self.options.name,
                action = event.action,
                error = %err,
                "cache action failed"
            );
        }

        self.hooks.dispatch_post(&event, outcome_of(event.action, &result));

        if let Some(reply) = envelope.reply {
            // The caller may have timed out and dropped the receiver.
            let _ = reply.send(result);
        }
    }

    /// Executes one command, wrapping writes in row locks when configured.
    async fn handle(&self, command: Command) -> Result<Reply, CacheError> {
        let lock_keys = self.row_lock_keys(&command);
        let locked = if lock_keys.is_empty() {
            Vec::new()
        } else {
            self.lock_rows(&lock_keys).await?
        };

        let result = self.dispatch(command).await;
        self.unlock_rows(&locked).await;
        result
    }

    async fn dispatch(&self, command: Command) -> Result<Reply, CacheError> {
        match command {
            Command::Get { key, fallback } => self.handle_get(&key, fallback).await,
            Command::GetAndUpdate {
                key,
                update,
                fallback,
            } => self.handle_get_and_update(&key, update, fallback).await,
            Command::Set { key, value, ttl_ms } => self.handle_set(&key, value, ttl_ms).await,
            Command::SetMany { pairs, ttl_ms } => self.handle_set_many(pairs, ttl_ms).await,
            Command::Update { key, value } => self.handle_update(&key, value).await,
            Command::Del { key } => self.handle_del(&key).await,
            Command::Clear => self.handle_clear().await,
            Command::Take { key } => self.handle_take(&key).await,
            Command::Incr {
                key,
                amount,
                initial,
                ..
            } => self.handle_incr(&key, amount, initial).await,
            Command::Expire { key, ttl_ms } => self.handle_expire(&key, ttl_ms).await,
            Command::ExpireAt { key, at_ms } => self.handle_expire_at(&key, at_ms).await,
            Command::Persist { key } => self.handle_persist(&key).await,
            Command::Refresh { key } => self.handle_refresh(&key).await,
            Command::Ttl { key } => self.handle_ttl(&key).await,
            Command::Size => Ok(Reply::Count(self.engine.len())),
            Command::Count => Ok(self.handle_count()),
            Command::Keys => Ok(self.handle_keys()),
            Command::IsEmpty => Ok(Reply::Flag(self.engine.is_empty())),
            Command::Exists { key } => self.handle_exists(&key).await,
            Command::Purge => self.handle_purge().await,
            Command::Stats => self.handle_stats(),
        }
    }

    // --- Read path ---

    /// Returns the live record under `key`, evicting it first when
    /// logically expired. Expired records are never surfaced to callers.
    async fn live_record(&self, key: &str, now: u64) -> Result<Option<CacheRecord>, CacheError> {
        match self.engine.get(key) {
            Some(record) if record.is_expired(now) => {
                self.apply_remove(key).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn handle_get(
        &self,
        key: &str,
        fallback: Option<Fallback>,
    ) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        if let Some(record) = self.live_record(key, now).await? {
            return Ok(Reply::Fetched(Lookup::Hit(record.value)));
        }

        let Some(fb) = fallback.or_else(|| self.options.default_fallback.clone()) else {
            return Ok(Reply::Fetched(Lookup::Miss));
        };

        let value = self.invoke_fallback(&fb, key)?;
        let record = CacheRecord::new(value.clone(), now, self.options.default_ttl_ms);
        self.apply_put(key, record).await?;
        Ok(Reply::Fetched(Lookup::Loaded(value)))
    }

    async fn handle_get_and_update(
        &self,
        key: &str,
        update: UpdateFn,
        fallback: Option<Fallback>,
    ) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();

        let (origin, base) = match self.live_record(key, now).await? {
            Some(record) => (Origin::Hit, Some(record)),
            None => match fallback.or_else(|| self.options.default_fallback.clone()) {
                Some(fb) => {
                    let value = self.invoke_fallback(&fb, key)?;
                    let record = CacheRecord::new(value, now, self.options.default_ttl_ms);
                    (Origin::Loaded, Some(record))
                }
                None => (Origin::Missing, None),
            },
        };

        let prior = base.as_ref().map(|r| &r.value);
        let next = match catch_unwind(AssertUnwindSafe(|| update(prior))) {
            Ok(value) => value,
            Err(_) => {
                return Err(CacheError::UpdateFailed {
                    key: key.to_string(),
                    reason: "update function panicked".to_string(),
                })
            }
        };

        // On a hit the TTL base is deliberately NOT refreshed.
        let record = match base {
            Some(mut record) => {
                record.value = next.clone();
                record
            }
            None => CacheRecord::new(next.clone(), now, self.options.default_ttl_ms),
        };
        self.apply_put(key, record).await?;
        Ok(Reply::Updated(origin, next))
    }

    fn invoke_fallback(&self, fb: &Fallback, key: &str) -> Result<Value, CacheError> {
        let args = self.options.fallback_args.as_slice();
        match catch_unwind(AssertUnwindSafe(|| fb(key, args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CacheError::FallbackFailed {
                key: key.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(CacheError::FallbackFailed {
                key: key.to_string(),
                reason: "fallback panicked".to_string(),
            }),
        }
    }

    // --- Write path ---

    async fn handle_set(
        &self,
        key: &str,
        value: Value,
        ttl_ms: Option<u64>,
    ) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        let record = CacheRecord::new(value, now, ttl_ms.or(self.options.default_ttl_ms));
        self.apply_put(key, record).await?;
        Ok(Reply::Wrote(true))
    }

    async fn handle_set_many(
        &self,
        pairs: Vec<(String, Value)>,
        ttl_ms: Option<u64>,
    ) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        let ttl = ttl_ms.or(self.options.default_ttl_ms);
        let written = pairs.len();
        for (key, value) in pairs {
            self.apply_put(&key, CacheRecord::new(value, now, ttl)).await?;
        }
        Ok(Reply::Count(written))
    }

    async fn handle_update(&self, key: &str, value: Value) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        match self.live_record(key, now).await? {
            None => Ok(Reply::Wrote(false)),
            Some(mut record) => {
                // Blind value overwrite: touched and ttl stay as they were.
                record.value = value;
                self.apply_put(key, record).await?;
                Ok(Reply::Wrote(true))
            }
        }
    }

    async fn handle_del(&self, key: &str) -> Result<Reply, CacheError> {
        self.apply_remove(key).await?;
        // The guarantee is "no longer present", so an absent key is success.
        Ok(Reply::Wrote(true))
    }

    async fn handle_clear(&self) -> Result<Reply, CacheError> {
        let removed = self.apply_clear().await?;
        Ok(Reply::Count(removed))
    }

    async fn handle_take(&self, key: &str) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        match self.live_record(key, now).await? {
            Some(record) => {
                self.apply_remove(key).await?;
                Ok(Reply::Taken(Some(record.value)))
            }
            None => Ok(Reply::Taken(None)),
        }
    }

    async fn handle_incr(&self, key: &str, amount: i64, initial: i64) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        match self.live_record(key, now).await? {
            Some(mut record) => {
                let Some(current) = record.value.as_int() else {
                    return Err(CacheError::NotANumber {
                        key: key.to_string(),
                    });
                };
                let next = current.saturating_add(amount);
                record.value = Value::Int(next);
                // Existing touched/ttl are preserved on a hit.
                self.apply_put(key, record).await?;
                Ok(Reply::Int(next))
            }
            None => {
                let next = initial.saturating_add(amount);
                let record =
                    CacheRecord::new(Value::Int(next), now, self.options.default_ttl_ms);
                self.apply_put(key, record).await?;
                Ok(Reply::Int(next))
            }
        }
    }

    // --- TTL management ---

    async fn handle_expire(&self, key: &str, ttl_ms: i64) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        match self.live_record(key, now).await? {
            None => Ok(Reply::Wrote(false)),
            Some(mut record) => {
                match u64::try_from(ttl_ms) {
                    Ok(ttl) if ttl > 0 => {
                        record.expire_in(now, ttl);
                        self.apply_put(key, record).await?;
                    }
                    // Zero or negative TTL: evict immediately.
                    _ => {
                        self.apply_remove(key).await?;
                    }
                }
                Ok(Reply::Wrote(true))
            }
        }
    }

    async fn handle_expire_at(&self, key: &str, at_ms: u64) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        match self.live_record(key, now).await? {
            None => Ok(Reply::Wrote(false)),
            Some(mut record) => {
                if at_ms <= now {
                    // A deadline at or before now evicts immediately.
                    self.apply_remove(key).await?;
                } else {
                    record.expire_in(now, at_ms - now);
                    self.apply_put(key, record).await?;
                }
                Ok(Reply::Wrote(true))
            }
        }
    }

    async fn handle_persist(&self, key: &str) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        match self.live_record(key, now).await? {
            None => Ok(Reply::Wrote(false)),
            Some(mut record) => {
                record.persist();
                self.apply_put(key, record).await?;
                Ok(Reply::Wrote(true))
            }
        }
    }

    async fn handle_refresh(&self, key: &str) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        match self.live_record(key, now).await? {
            None => Ok(Reply::Wrote(false)),
            Some(mut record) => {
                record.refresh(now);
                self.apply_put(key, record).await?;
                Ok(Reply::Wrote(true))
            }
        }
    }

    async fn handle_ttl(&self, key: &str) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        let status = match self.live_record(key, now).await? {
            None => TtlStatus::Missing,
            Some(record) => match record.remaining_ttl(now) {
                Some(remaining) => TtlStatus::Remaining(remaining),
                None => TtlStatus::NoExpiry,
            },
        };
        Ok(Reply::Ttl(status))
    }

    // --- Inspection ---

    fn handle_count(&self) -> Reply {
        let now = self.options.clock.now();
        let live = self
            .engine
            .snapshot()
            .iter()
            .filter(|(_, record)| !record.is_expired(now))
            .count();
        Reply::Count(live)
    }

    fn handle_keys(&self) -> Reply {
        // Cheap path: expired-inclusive, no filtering scan.
        let keys = self.engine.snapshot().into_iter().map(|(k, _)| k).collect();
        Reply::Keys(keys)
    }

    async fn handle_exists(&self, key: &str) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        Ok(Reply::Flag(self.live_record(key, now).await?.is_some()))
    }

    async fn handle_purge(&self) -> Result<Reply, CacheError> {
        let now = self.options.clock.now();
        let mut evicted = 0_usize;
        for (key, record) in self.engine.snapshot() {
            if record.is_expired(now) {
                self.apply_remove(&key).await?;
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(cache = %self.options.name, evicted, "purged expired records");
        }
        Ok(Reply::Count(evicted))
    }

    fn handle_stats(&self) -> Result<Reply, CacheError> {
        match &self.stats {
            Some(stats) => Ok(Reply::Stats(stats.snapshot())),
            None => Err(CacheError::StatsNotEnabled),
        }
    }

    // --- Storage application (local + replicated) ---

    async fn apply_put(&self, key: &str, record: CacheRecord) -> Result<(), CacheError> {
        self.engine.put(key, record.clone());
        if let Some(replicator) = &self.replicator {
            replicator
                .broadcast(&Mutation::Put {
                    key: key.to_string(),
                    record,
                })
                .await?;
        }
        Ok(())
    }

    async fn apply_remove(&self, key: &str) -> Result<(), CacheError> {
        self.engine.remove(key);
        if let Some(replicator) = &self.replicator {
            replicator
                .broadcast(&Mutation::Remove {
                    key: key.to_string(),
                })
                .await?;
        }
        Ok(())
    }

    async fn apply_clear(&self) -> Result<usize, CacheError> {
        let removed = self.engine.clear();
        if let Some(replicator) = &self.replicator {
            replicator.broadcast(&Mutation::Clear).await?;
        }
        Ok(removed)
    }

    // --- Row locks (transactional mode) ---

    /// Keys to row-lock for this command; empty outside transactional
    /// mode. Whole-table operations rely on worker serialisation alone.
    fn row_lock_keys(&self, command: &Command) -> Vec<String> {
        if !self.options.transactional {
            return Vec::new();
        }
        match command {
            Command::GetAndUpdate { key, .. }
            | Command::Set { key, .. }
            | Command::Update { key, .. }
            | Command::Del { key }
            | Command::Take { key }
            | Command::Incr { key, .. }
            | Command::Expire { key, .. }
            | Command::ExpireAt { key, .. }
            | Command::Persist { key }
            | Command::Refresh { key } => vec![key.clone()],
            Command::Get { key, fallback } => {
                // A get only writes when a fallback can fire.
                if fallback.is_some() || self.options.default_fallback.is_some() {
                    vec![key.clone()]
                } else {
                    Vec::new()
                }
            }
            Command::SetMany { pairs, .. } => pairs.iter().map(|(k, _)| k.clone()).collect(),
            _ => Vec::new(),
        }
    }

    async fn lock_rows(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        let keys = normalise_keys(keys);
        self.locks.lock(&keys).await;
        if let Some(replicator) = &self.replicator {
            if let Err(err) = replicator.lock_all(&keys).await {
                self.locks.unlock(&keys);
                return Err(err);
            }
        }
        Ok(keys)
    }

    async fn unlock_rows(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Some(replicator) = &self.replicator {
            replicator.unlock_all(keys).await;
        }
        self.locks.unlock(keys);
    }
}

/// Maps a command result to the summary delivered to post-hooks.
fn outcome_of(action: &'static str, result: &Result<Reply, CacheError>) -> Outcome {
    match result {
        Ok(Reply::Fetched(Lookup::Hit(_))) => Outcome::Hit,
        Ok(Reply::Fetched(Lookup::Loaded(_))) => Outcome::Loaded,
        Ok(Reply::Fetched(Lookup::Miss)) => Outcome::Miss,
        Ok(Reply::Updated(..) | Reply::Int(_)) => Outcome::Written,
        // del succeeds whether or not the key existed; it counts as one
        // eviction either way (the worker cannot tell the difference).
        Ok(Reply::Wrote(true)) if action == "del" => Outcome::Removed(1),
        Ok(Reply::Wrote(true)) => Outcome::Written,
        Ok(Reply::Wrote(false)) => Outcome::Missing,
        Ok(Reply::Count(n)) => match action {
            "clear" => Outcome::Removed(*n as u64),
            "purge" => Outcome::Expired(*n as u64),
            "set_many" => Outcome::Written,
            _ => Outcome::Info,
        },
        Ok(Reply::Taken(Some(_))) => Outcome::Taken,
        Ok(Reply::Taken(None)) => Outcome::Miss,
        Ok(Reply::Flag(found)) if action == "exists" => {
            if *found {
                Outcome::Hit
            } else {
                Outcome::Miss
            }
        }
        Ok(Reply::Flag(_) | Reply::Ttl(_) | Reply::Keys(_) | Reply::Stats(_)) => Outcome::Info,
        Err(err) => Outcome::Failed(err.kind()),
    }
}
