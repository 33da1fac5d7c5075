use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::constants::TTL_INFINITY;
use crate::AreaId;

/// A versioned value plus the metadata conflict resolution runs on.
///
/// Records are replaced wholesale on update; the only in-place mutation ever
/// performed is a TTL refresh, which touches `ttl_ms` and `ttl_version` and
/// nothing else. A record with `value: None` is a TTL-refresh message, never
/// a stored state — the absence is a tagged variant, not an empty payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    /// Monotone within a (key, originator). 0 is the "unknown" sentinel and
    /// is never stored.
    pub version: u64,
    /// Node that authored the record.
    pub originator_id: String,
    /// Opaque payload. `None` marks a TTL-refresh message.
    pub value: Option<Vec<u8>>,
    /// Monotone refresh counter within a (key, originator, version).
    pub ttl_version: u64,
    /// Remaining lifetime in milliseconds, or [`TTL_INFINITY`].
    pub ttl_ms: i64,
    /// Cached digest of `(version, originator_id, value)`; filled on first
    /// merge when absent.
    pub hash: Option<i64>,
}

impl Record {
    /// A value-bearing record with its hash computed eagerly.
    pub fn new(version: u64, originator_id: impl Into<String>, value: Vec<u8>, ttl_ms: i64) -> Self {
        let originator_id = originator_id.into();
        let value = Some(value);
        let hash = Some(generate_hash(version, &originator_id, &value));
        Record { version, originator_id, value, ttl_version: 0, ttl_ms, hash }
    }

    /// A TTL-refresh message for an existing (key, version, originator).
    pub fn ttl_refresh(
        version: u64,
        originator_id: impl Into<String>,
        ttl_version: u64,
        ttl_ms: i64,
    ) -> Self {
        Record {
            version,
            originator_id: originator_id.into(),
            value: None,
            ttl_version,
            ttl_ms,
            hash: None,
        }
    }

    pub fn is_ttl_refresh(&self) -> bool {
        self.value.is_none()
    }

    /// `true` for `TTL_INFINITY` or any positive lifetime.
    pub fn ttl_is_valid(&self) -> bool {
        self.ttl_ms == TTL_INFINITY || self.ttl_ms > 0
    }

    /// Copy with the value stripped but the hash retained — the compact form
    /// exchanged during sync negotiation. Fills the hash if it was never
    /// cached.
    pub fn without_value(&self) -> Record {
        let hash = self
            .hash
            .or_else(|| Some(generate_hash(self.version, &self.originator_id, &self.value)));
        Record { value: None, hash, ..self.clone() }
    }
}

/// Digest of `(version, originator_id, value)` used for sync comparisons.
///
/// `DefaultHasher::new()` uses fixed keys, so the digest is identical across
/// processes and platforms running the same software.
pub fn generate_hash(version: u64, originator_id: &str, value: &Option<Vec<u8>>) -> i64 {
    let mut hasher = DefaultHasher::new();
    version.hash(&mut hasher);
    originator_id.hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finish() as i64
}

/// A batch of store changes: the merge delta fanned out to subscribers and
/// flooded to peers, and the carrier for three-way sync negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Publication {
    pub area: AreaId,
    /// Records that changed (or, during sync, records we hold and the peer
    /// should accept).
    pub key_vals: HashMap<String, Record>,
    /// Keys removed by TTL expiry.
    pub expired_keys: Vec<String>,
    /// Keys the sender wants back from the receiver.
    pub tobe_updated_keys: Vec<String>,
}

impl Publication {
    pub fn new(area: impl Into<AreaId>) -> Self {
        Publication { area: area.into(), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.key_vals.is_empty() && self.expired_keys.is_empty() && self.tobe_updated_keys.is_empty()
    }
}
