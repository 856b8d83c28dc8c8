//! Periodic TTL sweeper.
//!
//! The janitor does not touch storage itself: each tick it enqueues a
//! fire-and-forget `Purge` command so the sweep runs inside the worker's
//! critical section, replication and hook dispatch included. The worker
//! emits the `purge` post-hook event with the eviction count.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::cache::request::{Command, Envelope};

/// Periodic purge trigger for one cache instance.
pub(crate) struct Janitor {
    tx: mpsc::Sender<Envelope>,
    interval_ms: u64,
    stop: watch::Receiver<bool>,
}

impl Janitor {
    pub(crate) fn new(
        tx: mpsc::Sender<Envelope>,
        interval_ms: u64,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tx,
            interval_ms,
            stop,
        }
    }

    /// Ticks until stop is signalled or the worker inbox closes.
    ///
    /// Missed ticks are skipped, not made up: the next sweep catches
    /// every record that expired in the meantime regardless.
    pub(crate) async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; skip it so
        // the first sweep happens one full interval after startup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let envelope = Envelope {
                        command: Command::Purge,
                        reply: None,
                    };
                    if self.tx.send(envelope).await.is_err() {
                        // Worker inbox closed; nothing left to sweep for.
                        break;
                    }
                    tracing::trace!(interval_ms = self.interval_ms, "janitor tick");
                }
                // Fires on the stop signal or when the sender is dropped;
                // either way there is nothing left to sweep for.
                _ = self.stop.changed() => break,
            }
        }
        tracing::debug!("janitor stopped");
    }
}
