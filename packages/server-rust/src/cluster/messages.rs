//! Replicated mutation wire messages.
//!
//! A [`Mutation`] is the unit the worker broadcasts to peer nodes in
//! remote mode. Encoded as named `MsgPack` between real nodes; in-process
//! peers apply it directly.

use cachegrid_core::CacheRecord;
use serde::{Deserialize, Serialize};

/// A storage-level mutation applied identically on every node.
///
/// The worker resolves TTLs, defaults, and prior state locally, then
/// ships the already-materialised effect. Peers apply it without further
/// interpretation, which keeps the broadcast order the only ordering that
/// matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutation {
    /// Insert or replace the record under `key`.
    Put {
        /// Target key.
        key: String,
        /// The fully materialised record (TTL base included).
        record: CacheRecord,
    },
    /// Remove the record under `key`, if any.
    Remove {
        /// Target key.
        key: String,
    },
    /// Remove every record.
    Clear,
}

impl Mutation {
    /// The key this mutation targets, `None` for whole-cache mutations.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Mutation::Put { key, .. } | Mutation::Remove { key } => Some(key),
            Mutation::Clear => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use cachegrid_core::Value;

    use super::*;

    /// Serialize to MsgPack named and deserialize back, asserting equality.
    fn round_trip(mutation: &Mutation) {
        let bytes = rmp_serde::to_vec_named(mutation).expect("serialize failed");
        let decoded: Mutation = rmp_serde::from_slice(&bytes).expect("deserialize failed");
        assert_eq!(mutation, &decoded);
    }

    #[test]
    fn serde_put_with_ttl() {
        round_trip(&Mutation::Put {
            key: "session:42".to_string(),
            record: CacheRecord::new(Value::from("payload"), 1_700_000_000_000, Some(30_000)),
        });
    }

    #[test]
    fn serde_put_without_ttl() {
        round_trip(&Mutation::Put {
            key: "pinned".to_string(),
            record: CacheRecord::new(Value::Int(7), 1_700_000_000_000, None),
        });
    }

    #[test]
    fn serde_remove() {
        round_trip(&Mutation::Remove {
            key: "session:42".to_string(),
        });
    }

    #[test]
    fn serde_clear() {
        round_trip(&Mutation::Clear);
    }

    #[test]
    fn key_accessor() {
        let put = Mutation::Put {
            key: "a".to_string(),
            record: CacheRecord::new(Value::Null, 0, None),
        };
        assert_eq!(put.key(), Some("a"));
        assert_eq!(Mutation::Remove { key: "b".to_string() }.key(), Some("b"));
        assert_eq!(Mutation::Clear.key(), None);
    }
}
