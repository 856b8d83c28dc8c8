//! `CacheGrid` Server -- in-memory key/value cache instances with TTL
//! expiry, fallback loading, observation hooks, and optional multi-node
//! replication.
//!
//! A process hosts one or more named caches. Each instance is a
//! serialising worker task fed by a bounded queue, a periodic janitor
//! (when configured), and one dispatch task per registered hook. Remote
//! mode broadcasts every mutation to the configured peer nodes before a
//! synchronous caller sees success.

pub mod cache;
pub mod cluster;
pub mod error;
pub mod hooks;
pub mod registry;
pub mod storage;

pub use cache::{
    fallback_fn, Cache, CacheOptions, CacheOptionsBuilder, Fallback, GetOptions, IncrOptions,
    Lookup, MutationOptions, Origin, TtlStatus, WriteOptions,
};
pub use cluster::{InProcessNode, Mutation, PeerNode, Replicator, RowLockManager};
pub use error::CacheError;
pub use hooks::{ActionEvent, CacheHook, HookKind, HookSpec, Outcome, StatsHook, StatsSnapshot};
pub use registry::CacheRegistry;
pub use storage::{DashMapStorage, StorageEngine};


/// End-to-end tests for the full cache pipeline:
/// handle -> queue -> worker -> storage/replication -> hooks.
#[cfg(test)]
mod integration_tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use cachegrid_core::{CacheRecord, ClockSource, Value};

    use crate::cache::{
        fallback_fn, Cache, CacheOptions, GetOptions, IncrOptions, Lookup, MutationOptions,
        TtlStatus, WriteOptions,
    };
    use crate::cluster::{InProcessNode, Mutation, PeerNode};
    use crate::error::CacheError;
    use crate::storage::{DashMapStorage, StorageEngine};

    /// Deterministic clock driven by the test.
    struct TestClock {
        time: AtomicU64,
    }

    impl TestClock {
        fn at(start: u64) -> Arc<Self> {
            Arc::new(Self {
                time: AtomicU64::new(start),
            })
        }

        fn advance(&self, delta: u64) {
            self.time.fetch_add(delta, Ordering::Relaxed);
        }
    }

    impl ClockSource for TestClock {
        fn now(&self) -> u64 {
            self.time.load(Ordering::Relaxed)
        }
    }

    /// Peer that delays every apply by a fixed tokio duration.
    struct SlowNode {
        inner: InProcessNode,
        delay: Duration,
    }

    #[async_trait]
    impl PeerNode for SlowNode {
        fn node_id(&self) -> &str {
            self.inner.node_id()
        }

        async fn apply(&self, mutation: &Mutation) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.apply(mutation).await
        }

        async fn lock_keys(&self, keys: &[String]) -> anyhow::Result<()> {
            self.inner.lock_keys(keys).await
        }

        async fn unlock_keys(&self, keys: &[String]) {
            self.inner.unlock_keys(keys).await;
        }
    }

    /// Peer that refuses every mutation.
    struct RefusingNode;

    #[async_trait]
    impl PeerNode for RefusingNode {
        fn node_id(&self) -> &str {
            "refusing"
        }

        async fn apply(&self, _mutation: &Mutation) -> anyhow::Result<()> {
            anyhow::bail!("node down")
        }

        async fn lock_keys(&self, _keys: &[String]) -> anyhow::Result<()> {
            anyhow::bail!("node down")
        }

        async fn unlock_keys(&self, _keys: &[String]) {}
    }

    fn clocked(name: &str, clock: &Arc<TestClock>) -> CacheOptions {
        CacheOptions::builder(name)
            .clock(Arc::clone(clock) as Arc<dyn ClockSource>)
            .build()
            .unwrap()
    }

    // Scenario: set-get hit.
    #[tokio::test]
    async fn set_get_hit() {
        let cache = Cache::start(CacheOptions::builder("e2e-hit").build().unwrap()).unwrap();

        assert!(cache
            .set("k", Value::from("v"), WriteOptions::default())
            .await
            .unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Lookup::Hit(Value::from("v")));

        // A second set overwrites unconditionally.
        cache
            .set("k", Value::from("v2"), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Lookup::Hit(Value::from("v2")));

        cache.stop();
    }

    // Scenario: miss with fallback loads, caches, and later hits.
    #[tokio::test]
    async fn miss_with_fallback_loads_then_hits() {
        let cache = Cache::start(CacheOptions::builder("e2e-fallback").build().unwrap()).unwrap();

        let reversed = cache
            .get_with(
                "missing_key",
                GetOptions {
                    fallback: Some(fallback_fn(|key, _| {
                        Ok(Value::String(key.chars().rev().collect()))
                    })),
                },
            )
            .await
            .unwrap();
        assert_eq!(reversed, Lookup::Loaded(Value::from("yek_gnissim")));

        assert_eq!(
            cache.get("missing_key").await.unwrap(),
            Lookup::Hit(Value::from("yek_gnissim"))
        );

        cache.stop();
    }

    // Scenario: TTL expiry after the clock advances past the deadline.
    #[tokio::test]
    async fn ttl_expiry_turns_hit_into_miss() {
        let clock = TestClock::at(1_000);
        let cache = Cache::start(clocked("e2e-ttl", &clock)).unwrap();

        cache
            .set("k", Value::from("v"), WriteOptions::with_ttl(50))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Lookup::Hit(Value::from("v")));

        clock.advance(100);
        assert_eq!(cache.get("k").await.unwrap(), Lookup::Miss);

        cache.stop();
    }

    // Scenario: increment with the default amount.
    #[tokio::test]
    async fn incr_default_amount() {
        let cache = Cache::start(CacheOptions::builder("e2e-incr").build().unwrap()).unwrap();

        cache
            .set("n", Value::Int(10), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(cache.incr("n", IncrOptions::default()).await.unwrap(), 11);

        cache.stop();
    }

    // Scenario: increment initialises a missing key.
    #[tokio::test]
    async fn incr_initialises_missing_key() {
        let cache = Cache::start(CacheOptions::builder("e2e-incr-init").build().unwrap()).unwrap();

        let options = IncrOptions {
            amount: 5,
            initial: 0,
            asynchronous: false,
        };
        assert_eq!(cache.incr("new", options).await.unwrap(), 5);

        cache.stop();
    }

    // Scenario: async set is observed by a later read.
    #[tokio::test]
    async fn async_set_eventual_consistency() {
        let cache = Cache::start(CacheOptions::builder("e2e-async").build().unwrap()).unwrap();

        assert!(cache
            .set("k", Value::from("v"), WriteOptions::fire_and_forget())
            .await
            .unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Lookup::Hit(Value::from("v")));

        cache.stop();
    }

    // Scenario: refresh restores the full TTL window.
    #[tokio::test]
    async fn refresh_preserves_ttl_window() {
        let clock = TestClock::at(1_000);
        let cache = Cache::start(clocked("e2e-refresh", &clock)).unwrap();

        cache
            .set("k", Value::from("v"), WriteOptions::with_ttl(5_000))
            .await
            .unwrap();

        clock.advance(4_000);
        assert!(cache.refresh("k", MutationOptions::default()).await.unwrap());

        match cache.ttl("k").await.unwrap() {
            TtlStatus::Remaining(remaining) => {
                assert!((4_900..=5_000).contains(&remaining), "remaining={remaining}");
            }
            other => panic!("unexpected ttl status: {other:?}"),
        }

        cache.stop();
    }

    // Scenario: stats are refused when not recorded.
    #[tokio::test]
    async fn stats_off_reports_not_enabled() {
        let cache = Cache::start(CacheOptions::builder("e2e-nostats").build().unwrap()).unwrap();

        let err = cache.stats().await.unwrap_err();
        assert!(matches!(err, CacheError::StatsNotEnabled));

        cache.stop();
    }

    #[tokio::test]
    async fn stats_fold_hits_misses_and_writes() {
        let cache = Cache::start(
            CacheOptions::builder("e2e-stats")
                .record_stats(true)
                .build()
                .unwrap(),
        )
        .unwrap();

        cache
            .set("k", Value::Int(1), WriteOptions::default())
            .await
            .unwrap();
        cache.get("k").await.unwrap(); // hit
        cache.get("nope").await.unwrap(); // miss
        cache.del("k", MutationOptions::default()).await.unwrap();

        // Post-hooks are asynchronous; poll until the counters catch up.
        let mut snapshot = cache.stats().await.unwrap();
        for _ in 0..10_000 {
            if snapshot.op_count >= 4 {
                break;
            }
            tokio::task::yield_now().await;
            snapshot = cache.stats().await.unwrap();
        }

        assert_eq!(snapshot.hit_count, 1);
        assert_eq!(snapshot.miss_count, 1);
        assert_eq!(snapshot.set_count, 1);
        assert_eq!(snapshot.eviction_count, 1);
        assert_eq!(snapshot.request_count, snapshot.op_count);

        cache.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_sweeps_expired_records() {
        let clock = TestClock::at(1_000);
        let cache = Cache::start(
            CacheOptions::builder("e2e-janitor")
                .clock(Arc::clone(&clock) as Arc<dyn ClockSource>)
                .janitor_interval_ms(100)
                .build()
                .unwrap(),
        )
        .unwrap();

        cache
            .set("dying", Value::Int(1), WriteOptions::with_ttl(50))
            .await
            .unwrap();
        cache
            .set("staying", Value::Int(2), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(cache.size().await.unwrap(), 2);

        // Pass the record's deadline, then let the janitor tick.
        clock.advance(100);
        tokio::time::sleep(Duration::from_millis(250)).await;

        // size is expired-inclusive, so 1 here proves physical removal.
        assert_eq!(cache.size().await.unwrap(), 1);
        assert!(cache.exists("staying").await.unwrap());

        cache.stop();
    }

    #[tokio::test]
    async fn purge_reports_eviction_count() {
        let clock = TestClock::at(1_000);
        let cache = Cache::start(clocked("e2e-purge", &clock)).unwrap();

        for i in 0..4 {
            cache
                .set(format!("k{i}"), Value::Int(i), WriteOptions::with_ttl(10))
                .await
                .unwrap();
        }
        cache
            .set("keep", Value::Null, WriteOptions::default())
            .await
            .unwrap();

        clock.advance(50);
        assert_eq!(cache.purge(MutationOptions::default()).await.unwrap(), 4);
        assert_eq!(cache.size().await.unwrap(), 1);

        cache.stop();
    }

    #[tokio::test]
    async fn remote_mode_replicates_to_peers() {
        let peer_engine: Arc<dyn StorageEngine> = Arc::new(DashMapStorage::new());
        let peer: Arc<dyn PeerNode> =
            Arc::new(InProcessNode::new("peer-1", Arc::clone(&peer_engine)));

        let cache = Cache::start(
            CacheOptions::builder("e2e-remote")
                .node(peer)
                .build()
                .unwrap(),
        )
        .unwrap();

        cache
            .set("k", Value::from("v"), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(peer_engine.get("k").unwrap().value, Value::from("v"));

        cache.del("k", MutationOptions::default()).await.unwrap();
        assert!(peer_engine.get("k").is_none());

        cache.stop();
    }

    #[tokio::test]
    async fn replication_failure_surfaces_without_rollback() {
        let cache = Cache::start(
            CacheOptions::builder("e2e-repl-fail")
                .node(Arc::new(RefusingNode))
                .build()
                .unwrap(),
        )
        .unwrap();

        let err = cache
            .set("k", Value::Int(1), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::ReplicationFailed { ref failed_nodes } if failed_nodes == &vec!["refusing".to_string()]
        ));

        // No rollback: the local write survives the failed broadcast.
        assert_eq!(cache.get("k").await.unwrap(), Lookup::Hit(Value::Int(1)));

        cache.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn client_timeout_does_not_cancel_the_mutation() {
        let peer_engine: Arc<dyn StorageEngine> = Arc::new(DashMapStorage::new());
        let slow: Arc<dyn PeerNode> = Arc::new(SlowNode {
            inner: InProcessNode::new("slow", Arc::clone(&peer_engine)),
            delay: Duration::from_millis(500),
        });

        let cache = Cache::start(
            CacheOptions::builder("e2e-timeout")
                .node(slow)
                .call_timeout_ms(50)
                .replication_ack_timeout_ms(5_000)
                .build()
                .unwrap(),
        )
        .unwrap();

        let err = cache
            .set("k", Value::Int(1), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Timeout { timeout_ms: 50 }));

        // The worker finishes the replication anyway.
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(peer_engine.get("k").unwrap().value, Value::Int(1));

        cache.stop();
    }

    #[tokio::test]
    async fn set_many_writes_every_pair() {
        let cache = Cache::start(CacheOptions::builder("e2e-many").build().unwrap()).unwrap();

        let written = cache
            .set_many(
                vec![
                    ("a".to_string(), Value::Int(1)),
                    ("b".to_string(), Value::Int(2)),
                    ("c".to_string(), Value::Int(3)),
                ],
                WriteOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(cache.count().await.unwrap(), 3);

        cache.stop();
    }

    #[tokio::test]
    async fn take_and_del_round_trips() {
        let cache = Cache::start(CacheOptions::builder("e2e-take").build().unwrap()).unwrap();

        cache
            .set("k", Value::from("v"), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(
            cache.take("k", MutationOptions::default()).await.unwrap(),
            Some(Value::from("v"))
        );
        assert_eq!(cache.take("k", MutationOptions::default()).await.unwrap(), None);

        // del is idempotent success.
        assert!(cache.del("k", MutationOptions::default()).await.unwrap());
        assert!(cache.del("k", MutationOptions::default()).await.unwrap());

        cache.stop();
    }

    #[tokio::test]
    async fn replicated_record_carries_ttl_metadata() {
        let clock = TestClock::at(1_000);
        let peer_engine: Arc<dyn StorageEngine> = Arc::new(DashMapStorage::new());
        let peer: Arc<dyn PeerNode> =
            Arc::new(InProcessNode::new("peer-1", Arc::clone(&peer_engine)));

        let cache = Cache::start(
            CacheOptions::builder("e2e-remote-ttl")
                .clock(Arc::clone(&clock) as Arc<dyn ClockSource>)
                .node(peer)
                .build()
                .unwrap(),
        )
        .unwrap();

        cache
            .set("k", Value::Int(1), WriteOptions::with_ttl(30_000))
            .await
            .unwrap();

        let replica = peer_engine.get("k").unwrap();
        assert_eq!(
            replica,
            CacheRecord::new(Value::Int(1), 1_000, Some(30_000))
        );

        cache.stop();
    }
}
