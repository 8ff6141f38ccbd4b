//! Per-process hash chain.
//!
//! Each record carries the leaf hash of its predecessor, so any edit to a
//! historical record breaks every later link. The chain head lives for the
//! lifetime of the process; on restart it resets to `None` and cross-process
//! continuity is the ingest server's responsibility.

use serde_json::Value;
use std::sync::Mutex;

use crate::hash::{digest_value, LeafHash};

/// Result of linking one record into the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    /// Leaf hash of the record just linked.
    pub leaf_hash: LeafHash,
    /// Leaf hash of its predecessor, if any.
    pub prev_hash: Option<LeafHash>,
}

/// Process-wide chain state.
///
/// `link` runs under a mutex so linkage order matches the order callers
/// observe; the enqueue path holds this lock across the outbox append so
/// chain order and file order agree.
#[derive(Debug, Default)]
pub struct HashChain {
    head: Mutex<Option<LeafHash>>,
}

impl HashChain {
    /// Create a chain with no head (first record links to `null`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a record payload into the chain.
    ///
    /// Sets `prev_hash` on the payload from the current head, computes the
    /// leaf hash over the canonical payload (which must not yet contain
    /// `leaf_hash`), injects `leaf_hash`, and advances the head.
    ///
    /// # Panics
    ///
    /// Never panics; a poisoned mutex is recovered since the guarded value
    /// is a plain copyable option.
    pub fn link(&self, payload: &mut Value) -> ChainLink {
        let mut head = self.head.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let prev_hash = *head;

        if let Value::Object(map) = payload {
            map.insert(
                "prev_hash".to_string(),
                match prev_hash {
                    Some(h) => Value::String(h.to_hex()),
                    None => Value::Null,
                },
            );
            // leaf_hash is excluded from its own digest.
            map.remove("leaf_hash");
        }

        let leaf_hash = digest_value(Some(payload));

        if let Value::Object(map) = payload {
            map.insert("leaf_hash".to_string(), Value::String(leaf_hash.to_hex()));
        }

        *head = Some(leaf_hash);
        ChainLink {
            leaf_hash,
            prev_hash,
        }
    }

    /// Current chain head.
    #[must_use]
    pub fn head(&self) -> Option<LeafHash> {
        *self
            .head
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A linkage defect found by [`verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIssue {
    /// The first record's `prev_hash` is not null.
    NonNullGenesis,
    /// A record's `prev_hash` does not equal its predecessor's `leaf_hash`.
    BrokenLink {
        /// Zero-based index of the offending record.
        index: usize,
    },
    /// A record's stored `leaf_hash` does not match its recomputed digest.
    LeafMismatch {
        /// Zero-based index of the offending record.
        index: usize,
    },
}

/// Verify chain linkage over records in outbox order.
///
/// Returns the first defect found, or `None` for a valid chain. Used by
/// audit tooling and tests; the hot path never re-verifies.
#[must_use]
pub fn verify_chain(records: &[Value]) -> Option<ChainIssue> {
    let mut expected_prev: Option<String> = None;

    for (index, record) in records.iter().enumerate() {
        let prev = record.get("prev_hash").and_then(Value::as_str);
        match (&expected_prev, prev) {
            (None, None) => {},
            (None, Some(_)) if index == 0 => return Some(ChainIssue::NonNullGenesis),
            (Some(expected), Some(actual)) if expected == actual => {},
            _ => return Some(ChainIssue::BrokenLink { index }),
        }

        let stored_leaf = record
            .get("leaf_hash")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let mut without_leaf = record.clone();
        if let Value::Object(map) = &mut without_leaf {
            map.remove("leaf_hash");
        }
        let recomputed = digest_value(Some(&without_leaf)).to_hex();
        match stored_leaf {
            Some(leaf) if leaf == recomputed => expected_prev = Some(leaf),
            _ => return Some(ChainIssue::LeafMismatch { index }),
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_record_links_to_null() {
        let chain = HashChain::new();
        let mut payload = json!({"id": "r1", "x": 1});
        let link = chain.link(&mut payload);

        assert!(link.prev_hash.is_none());
        assert_eq!(payload["prev_hash"], Value::Null);
        assert_eq!(payload["leaf_hash"], json!(link.leaf_hash.to_hex()));
        assert_eq!(chain.head(), Some(link.leaf_hash));
    }

    #[test]
    fn consecutive_records_link() {
        let chain = HashChain::new();
        let mut a = json!({"id": "a"});
        let mut b = json!({"id": "b"});
        let mut c = json!({"id": "c"});

        let la = chain.link(&mut a);
        let lb = chain.link(&mut b);
        let lc = chain.link(&mut c);

        assert_eq!(lb.prev_hash, Some(la.leaf_hash));
        assert_eq!(lc.prev_hash, Some(lb.leaf_hash));
        assert_eq!(b["prev_hash"], json!(la.leaf_hash.to_hex()));
        assert_eq!(c["prev_hash"], json!(lb.leaf_hash.to_hex()));
    }

    #[test]
    fn leaf_excludes_itself() {
        let chain = HashChain::new();
        let mut payload = json!({"id": "r"});
        let link = chain.link(&mut payload);

        let mut without_leaf = payload.clone();
        without_leaf.as_object_mut().unwrap().remove("leaf_hash");
        assert_eq!(digest_value(Some(&without_leaf)), link.leaf_hash);
    }

    #[test]
    fn relinking_stale_leaf_is_replaced() {
        let chain = HashChain::new();
        let mut payload = json!({"id": "r", "leaf_hash": "stale"});
        let link = chain.link(&mut payload);
        assert_eq!(payload["leaf_hash"], json!(link.leaf_hash.to_hex()));
    }

    #[test]
    fn verify_accepts_valid_chain() {
        let chain = HashChain::new();
        let mut records = Vec::new();
        for i in 0..4 {
            let mut payload = json!({"id": format!("r{i}")});
            chain.link(&mut payload);
            records.push(payload);
        }
        assert_eq!(verify_chain(&records), None);
    }

    #[test]
    fn verify_detects_broken_link() {
        let chain = HashChain::new();
        let mut a = json!({"id": "a"});
        let mut b = json!({"id": "b"});
        chain.link(&mut a);
        chain.link(&mut b);

        b["prev_hash"] = json!(LeafHash::digest(b"other").to_hex());
        assert_eq!(
            verify_chain(&[a, b]),
            Some(ChainIssue::BrokenLink { index: 1 })
        );
    }

    #[test]
    fn verify_detects_tampered_record() {
        let chain = HashChain::new();
        let mut a = json!({"id": "a", "value": 1});
        chain.link(&mut a);

        a["value"] = json!(2);
        assert_eq!(
            verify_chain(&[a]),
            Some(ChainIssue::LeafMismatch { index: 0 })
        );
    }

    #[test]
    fn verify_rejects_non_null_genesis() {
        let chain = HashChain::new();
        let mut a = json!({"id": "a"});
        let mut b = json!({"id": "b"});
        chain.link(&mut a);
        chain.link(&mut b);

        // Chain starting at b claims a predecessor that is not present.
        assert_eq!(verify_chain(&[b]), Some(ChainIssue::NonNullGenesis));
    }
}
