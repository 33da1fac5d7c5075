//! Pure merge and comparison routines. Everything here operates on plain
//! maps; the [`KvStore`](crate::store::KvStore) wraps these with locking,
//! TTL scheduling and fanout.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use bifrost_types::constants::TTL_INFINITY;
use bifrost_types::{generate_hash, Publication, Record};

use crate::filter::KeyFilters;

/// Outcome of [`compare_values`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCompare {
    /// First record is authoritative.
    Greater,
    /// Second record is authoritative.
    Less,
    Equal,
    /// Neither side carries enough data to decide; callers must treat both
    /// directions as possibly better.
    Unknown,
}

/// Merge a batch of incoming records into `store`, returning the delta of
/// keys whose state visibly changed. The delta carries the inbound records
/// as-is; it is what gets flooded onward.
///
/// The conflict-resolution order is a strict total order — newer `version`
/// wins; on equal version the larger `originator_id` wins; on equal
/// version+originator the larger value bytes win; on identical value the
/// larger `ttl_version` wins — so any delivery interleaving converges.
pub fn merge_key_values(
    store: &mut HashMap<String, Record>,
    key_vals: HashMap<String, Record>,
    filters: Option<&KeyFilters>,
) -> HashMap<String, Record> {
    let mut delta: HashMap<String, Record> = HashMap::new();
    let mut value_updates = 0u32;
    let mut ttl_updates = 0u32;
    let mut dropped = 0u32;

    for (key, incoming) in key_vals {
        if let Some(filters) = filters {
            if !filters.matches(&key, &incoming) {
                trace!(key, originator = %incoming.originator_id, "record rejected by filter");
                continue;
            }
        }

        // TTL must be infinite or positive; a missing originator can never
        // win a comparison, drop it outright.
        if !incoming.ttl_is_valid() || incoming.originator_id.is_empty() {
            dropped += 1;
            continue;
        }

        let current = store.get(&key);
        // Stored versions start at 1, so an absent entry loses to any setter.
        let my_version = current.map_or(0, |c| c.version);
        if incoming.version < my_version {
            continue;
        }

        let mut update_value = false;
        let mut update_ttl = false;

        if !incoming.is_ttl_refresh() {
            if incoming.version > my_version {
                update_value = true;
            } else if let Some(current) = current {
                match incoming.originator_id.cmp(&current.originator_id) {
                    Ordering::Greater => update_value = true,
                    Ordering::Equal => match incoming.value.cmp(&current.value) {
                        // A previous incarnation of this node's own value
                        // reflected back by a neighbor; one side must win
                        // deterministically or the stores never converge.
                        Ordering::Greater => {
                            trace!(key, "previous incarnation reflected back");
                            update_value = true;
                        }
                        Ordering::Equal => {
                            if incoming.ttl_version > current.ttl_version {
                                update_ttl = true;
                            }
                        }
                        Ordering::Less => {}
                    },
                    Ordering::Less => {}
                }
            }
        } else if let Some(current) = current {
            // Value-less message: a TTL refresh for exactly the record we
            // hold, admitted only with a newer refresh counter.
            if incoming.version == current.version
                && incoming.originator_id == current.originator_id
                && incoming.ttl_version > current.ttl_version
            {
                update_ttl = true;
            }
        }

        if !update_value && !update_ttl {
            continue;
        }

        if update_value {
            let mut new_record = incoming.clone();
            if new_record.hash.is_none() {
                new_record.hash = Some(generate_hash(
                    new_record.version,
                    &new_record.originator_id,
                    &new_record.value,
                ));
            }
            store.insert(key.clone(), new_record);
            value_updates += 1;
        } else if let Some(stored) = store.get_mut(&key) {
            stored.ttl_ms = incoming.ttl_ms;
            stored.ttl_version = incoming.ttl_version;
            ttl_updates += 1;
        }

        delta.insert(key, incoming);
    }

    debug!(
        updates = delta.len(),
        value_updates, ttl_updates, dropped, "merged incoming key-vals"
    );
    delta
}

/// Decide which of two records is authoritative.
///
/// When both carry a hash and the hashes agree, `(version, originator,
/// value)` are known equal and the refresh counter breaks the tie. When the
/// hashes disagree (or one is missing) the raw value bytes decide; if either
/// side lacks its value — as in a hash-only sync dump — the ordering is
/// [`ValueCompare::Unknown`].
pub fn compare_values(a: &Record, b: &Record) -> ValueCompare {
    if a.version != b.version {
        return if a.version > b.version { ValueCompare::Greater } else { ValueCompare::Less };
    }
    if a.originator_id != b.originator_id {
        return if a.originator_id > b.originator_id {
            ValueCompare::Greater
        } else {
            ValueCompare::Less
        };
    }
    if let (Some(hash_a), Some(hash_b)) = (a.hash, b.hash) {
        if hash_a == hash_b {
            return match a.ttl_version.cmp(&b.ttl_version) {
                Ordering::Greater => ValueCompare::Greater,
                Ordering::Less => ValueCompare::Less,
                Ordering::Equal => ValueCompare::Equal,
            };
        }
    }
    match (a.value.as_ref(), b.value.as_ref()) {
        (Some(value_a), Some(value_b)) => match value_a.cmp(value_b) {
            Ordering::Greater => ValueCompare::Greater,
            Ordering::Less => ValueCompare::Less,
            Ordering::Equal => ValueCompare::Equal,
        },
        _ => ValueCompare::Unknown,
    }
}

/// Compute the three-way diff between our records and a peer's.
///
/// Keys only we hold (or where we are authoritative) land in `key_vals`;
/// keys only the peer holds (or where it is authoritative) land in
/// `tobe_updated_keys`; an [`ValueCompare::Unknown`] ordering pushes the key
/// both ways and lets the merge engine settle it on receipt.
pub fn dump_difference(
    area: &str,
    my_key_vals: &HashMap<String, Record>,
    peer_key_vals: &HashMap<String, Record>,
) -> Publication {
    let mut publication = Publication::new(area);

    let all_keys: HashSet<&String> = my_key_vals.keys().chain(peer_key_vals.keys()).collect();
    for key in all_keys {
        match (my_key_vals.get(key), peer_key_vals.get(key)) {
            (None, _) => publication.tobe_updated_keys.push(key.clone()),
            (Some(mine), None) => {
                publication.key_vals.insert(key.clone(), mine.clone());
            }
            (Some(mine), Some(theirs)) => match compare_values(mine, theirs) {
                ValueCompare::Greater => {
                    publication.key_vals.insert(key.clone(), mine.clone());
                }
                ValueCompare::Less => publication.tobe_updated_keys.push(key.clone()),
                ValueCompare::Equal => {}
                ValueCompare::Unknown => {
                    publication.key_vals.insert(key.clone(), mine.clone());
                    publication.tobe_updated_keys.push(key.clone());
                }
            },
        }
    }

    publication
}
