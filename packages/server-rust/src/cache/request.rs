//! Request and reply model for the cache worker.
//!
//! Every public API call becomes one [`Command`] variant carried in an
//! [`Envelope`] through the worker's queue. Synchronous calls attach a
//! oneshot reply sender; fire-and-forget calls attach none.

use cachegrid_core::Value;
use tokio::sync::oneshot;

use crate::cache::options::Fallback;
use crate::error::CacheError;
use crate::hooks::StatsSnapshot;

/// How a read obtained its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Live record found in the cache.
    Hit(Value),
    /// Miss turned into a value by the fallback; now cached.
    Loaded(Value),
    /// Nothing found and no fallback produced a value.
    Miss,
}

impl Lookup {
    /// The value, if the read produced one.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Lookup::Hit(v) | Lookup::Loaded(v) => Some(v),
            Lookup::Miss => None,
        }
    }

    /// Consumes the lookup, returning the value if any.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Lookup::Hit(v) | Lookup::Loaded(v) => Some(v),
            Lookup::Miss => None,
        }
    }
}

/// Where the prior value of a `get_and_update` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Prior value was a live record.
    Hit,
    /// Prior value came from the fallback.
    Loaded,
    /// There was no prior value.
    Missing,
}

/// Answer to a `ttl` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// Record present with a TTL; remaining lifetime in ms.
    Remaining(u64),
    /// Record present without a TTL.
    NoExpiry,
    /// No record under the key.
    Missing,
}

/// Options for `get`/`get_with`.
#[derive(Default)]
pub struct GetOptions {
    /// Per-call fallback, overriding the cache default.
    pub fallback: Option<Fallback>,
}

/// Options for value-writing mutations.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// TTL for the written record; `None` uses the cache default.
    pub ttl_ms: Option<u64>,
    /// Fire-and-forget: enqueue and return the sentinel immediately.
    pub asynchronous: bool,
}

impl WriteOptions {
    /// Synchronous write with an explicit TTL.
    #[must_use]
    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            asynchronous: false,
        }
    }

    /// Fire-and-forget write using the cache default TTL.
    #[must_use]
    pub fn fire_and_forget() -> Self {
        Self {
            ttl_ms: None,
            asynchronous: true,
        }
    }
}

/// Options for mutations that carry no payload knobs
/// (`update`, `del`, `clear`, TTL management, `take`, `purge`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationOptions {
    /// Fire-and-forget: enqueue and return the sentinel immediately.
    pub asynchronous: bool,
}

impl MutationOptions {
    /// Fire-and-forget delivery.
    #[must_use]
    pub fn fire_and_forget() -> Self {
        Self { asynchronous: true }
    }
}

/// Options for `incr`/`decr`.
#[derive(Debug, Clone)]
pub struct IncrOptions {
    /// Amount added to the stored integer.
    pub amount: i64,
    /// Value a missing key is initialised to before the addition.
    pub initial: i64,
    /// Fire-and-forget: enqueue and return the sentinel immediately.
    pub asynchronous: bool,
}

impl Default for IncrOptions {
    fn default() -> Self {
        Self {
            amount: 1,
            initial: 0,
            asynchronous: false,
        }
    }
}

impl IncrOptions {
    /// Synchronous step by `amount`.
    #[must_use]
    pub fn by(amount: i64) -> Self {
        Self {
            amount,
            ..Self::default()
        }
    }
}

/// Read-modify-write closure for `get_and_update`.
pub type UpdateFn = Box<dyn FnOnce(Option<&Value>) -> Value + Send>;

/// One cache operation, as processed by the worker.
pub enum Command {
    Get {
        key: String,
        fallback: Option<Fallback>,
    },
    GetAndUpdate {
        key: String,
        update: UpdateFn,
        fallback: Option<Fallback>,
    },
    Set {
        key: String,
        value: Value,
        ttl_ms: Option<u64>,
    },
    SetMany {
        pairs: Vec<(String, Value)>,
        ttl_ms: Option<u64>,
    },
    Update {
        key: String,
        value: Value,
    },
    Del {
        key: String,
    },
    Clear,
    Take {
        key: String,
    },
    Incr {
        key: String,
        amount: i64,
        initial: i64,
        /// `"incr"` or `"decr"`, used only for hook events.
        verb: &'static str,
    },
    Expire {
        key: String,
        ttl_ms: i64,
    },
    ExpireAt {
        key: String,
        at_ms: u64,
    },
    Persist {
        key: String,
    },
    Refresh {
        key: String,
    },
    Ttl {
        key: String,
    },
    Size,
    Count,
    Keys,
    IsEmpty,
    Exists {
        key: String,
    },
    Purge,
    Stats,
}

impl Command {
    /// Action name delivered to hooks.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::GetAndUpdate { .. } => "get_and_update",
            Command::Set { .. } => "set",
            Command::SetMany { .. } => "set_many",
            Command::Update { .. } => "update",
            Command::Del { .. } => "del",
            Command::Clear => "clear",
            Command::Take { .. } => "take",
            Command::Incr { verb, .. } => verb,
            Command::Expire { .. } => "expire",
            Command::ExpireAt { .. } => "expire_at",
            Command::Persist { .. } => "persist",
            Command::Refresh { .. } => "refresh",
            Command::Ttl { .. } => "ttl",
            Command::Size => "size",
            Command::Count => "count",
            Command::Keys => "keys",
            Command::IsEmpty => "empty",
            Command::Exists { .. } => "exists",
            Command::Purge => "purge",
            Command::Stats => "stats",
        }
    }

    /// Key the command targets, when it targets a single key.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Get { key, .. }
            | Command::GetAndUpdate { key, .. }
            | Command::Set { key, .. }
            | Command::Update { key, .. }
            | Command::Del { key }
            | Command::Take { key }
            | Command::Incr { key, .. }
            | Command::Expire { key, .. }
            | Command::ExpireAt { key, .. }
            | Command::Persist { key }
            | Command::Refresh { key }
            | Command::Ttl { key }
            | Command::Exists { key } => Some(key),
            Command::SetMany { .. }
            | Command::Clear
            | Command::Size
            | Command::Count
            | Command::Keys
            | Command::IsEmpty
            | Command::Purge
            | Command::Stats => None,
        }
    }
}

/// Worker reply, one variant per result shape.
#[derive(Debug)]
pub enum Reply {
    Fetched(Lookup),
    Updated(Origin, Value),
    Wrote(bool),
    Count(usize),
    Int(i64),
    Taken(Option<Value>),
    Ttl(TtlStatus),
    Keys(Vec<String>),
    Flag(bool),
    Stats(StatsSnapshot),
}

/// A command plus its reply channel (absent for fire-and-forget).
pub struct Envelope {
    pub command: Command,
    pub reply: Option<oneshot::Sender<Result<Reply, CacheError>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_value_accessors() {
        assert_eq!(Lookup::Hit(Value::Int(1)).value(), Some(&Value::Int(1)));
        assert_eq!(Lookup::Loaded(Value::Int(2)).into_value(), Some(Value::Int(2)));
        assert_eq!(Lookup::Miss.value(), None);
        assert_eq!(Lookup::Miss.into_value(), None);
    }

    #[test]
    fn incr_options_default_steps_by_one() {
        let opts = IncrOptions::default();
        assert_eq!(opts.amount, 1);
        assert_eq!(opts.initial, 0);
        assert!(!opts.asynchronous);
    }

    #[test]
    fn write_options_constructors() {
        assert_eq!(WriteOptions::with_ttl(50).ttl_ms, Some(50));
        assert!(WriteOptions::fire_and_forget().asynchronous);
    }

    #[test]
    fn command_action_names() {
        assert_eq!(
            Command::Get {
                key: "k".to_string(),
                fallback: None
            }
            .action(),
            "get"
        );
        assert_eq!(Command::Clear.action(), "clear");
        assert_eq!(
            Command::Incr {
                key: "k".to_string(),
                amount: -1,
                initial: 0,
                verb: "decr"
            }
            .action(),
            "decr"
        );
    }

    #[test]
    fn command_key_extraction() {
        let cmd = Command::Del {
            key: "k".to_string(),
        };
        assert_eq!(cmd.key(), Some("k"));
        assert_eq!(Command::Purge.key(), None);
        assert_eq!(
            Command::SetMany {
                pairs: vec![],
                ttl_ms: None
            }
            .key(),
            None
        );
    }
}
