//! Hook dispatch: one task per registered hook, fed by a bounded queue.
//!
//! The worker pushes events without awaiting; a backed-up hook exerts no
//! backpressure. Each queue is bounded -- on overflow the oldest event is
//! dropped and counted. A panicking hook is logged and its task keeps
//! draining; it never fails the originating action.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use super::{ActionEvent, CacheHook, HookKind, HookSpec, Outcome};

/// Event as carried on a hook queue.
#[derive(Debug, Clone)]
enum HookEvent {
    Pre(ActionEvent),
    Post(ActionEvent, Outcome),
}

/// Bounded drop-oldest event queue feeding one hook task.
struct HookQueue {
    hook_name: &'static str,
    capacity: usize,
    events: Mutex<VecDeque<HookEvent>>,
    dropped: AtomicU64,
    notify: Notify,
}

impl HookQueue {
    fn new(hook_name: &'static str, capacity: usize) -> Self {
        Self {
            hook_name,
            capacity,
            events: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueues an event, dropping the oldest one when the bound is hit.
    fn push(&self, event: HookEvent) {
        {
            let mut events = self.events.lock();
            if events.len() == self.capacity {
                events.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    hook = self.hook_name,
                    dropped,
                    "hook queue full, dropping oldest event"
                );
            }
            events.push_back(event);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<HookEvent> {
        self.events.lock().pop_front()
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Delivers one event, containing any panic to the hook itself.
fn deliver(hook: &Arc<dyn CacheHook>, event: &HookEvent) {
    let result = catch_unwind(AssertUnwindSafe(|| match event {
        HookEvent::Pre(action) => hook.on_action(action),
        HookEvent::Post(action, outcome) => hook.on_result(action, outcome),
    }));
    if result.is_err() {
        tracing::error!(hook = hook.name(), "cache hook panicked while handling event");
    }
}

/// Per-hook task: drains the queue in FIFO order until shutdown.
async fn run_hook_task(
    hook: Arc<dyn CacheHook>,
    queue: Arc<HookQueue>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        while let Some(event) = queue.pop() {
            deliver(&hook, &event);
        }
        if *stop.borrow() {
            // Final drain for events enqueued between the sweep and the signal.
            while let Some(event) = queue.pop() {
                deliver(&hook, &event);
            }
            break;
        }
        tokio::select! {
            () = queue.notify.notified() => {}
            changed = stop.changed() => {
                // A dropped sender means the cache is gone; no more
                // events can arrive and the queue is already empty.
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!(hook = hook.name(), "hook task stopped");
}

struct DispatchEntry {
    kind: HookKind,
    queue: Arc<HookQueue>,
}

/// Fans cache action events out to every registered hook.
///
/// Enqueue order across hooks follows registration order; each hook's
/// own delivery is FIFO and therefore follows the worker's action order.
pub struct HookDispatcher {
    entries: Vec<DispatchEntry>,
}

impl HookDispatcher {
    /// Spawns one dispatch task per hook spec.
    ///
    /// All tasks observe `stop`; on shutdown each drains its queue and
    /// exits.
    #[must_use]
    pub fn spawn(specs: &[HookSpec], queue_capacity: usize, stop: &watch::Sender<bool>) -> Self {
        let entries = specs
            .iter()
            .map(|spec| {
                let queue = Arc::new(HookQueue::new(spec.hook.name(), queue_capacity));
                tokio::spawn(run_hook_task(
                    Arc::clone(&spec.hook),
                    Arc::clone(&queue),
                    stop.subscribe(),
                ));
                DispatchEntry {
                    kind: spec.kind,
                    queue,
                }
            })
            .collect();
        Self { entries }
    }

    /// Sends the incoming action descriptor to every pre-hook.
    pub fn dispatch_pre(&self, event: &ActionEvent) {
        for entry in &self.entries {
            if entry.kind == HookKind::Pre {
                entry.queue.push(HookEvent::Pre(event.clone()));
            }
        }
    }

    /// Sends the action descriptor plus result summary to every post-hook.
    pub fn dispatch_post(&self, event: &ActionEvent, outcome: Outcome) {
        for entry in &self.entries {
            if entry.kind == HookKind::Post {
                entry.queue.push(HookEvent::Post(event.clone(), outcome));
            }
        }
    }

    /// Per-hook count of events dropped to queue overflow.
    #[must_use]
    pub fn dropped_events(&self) -> Vec<(&'static str, u64)> {
        self.entries
            .iter()
            .map(|e| (e.queue.hook_name, e.queue.dropped_count()))
            .collect()
    }
}
