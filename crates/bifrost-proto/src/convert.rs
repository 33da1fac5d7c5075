//! Wire ⇄ domain conversions for records and publications.

use std::collections::HashMap;

use bifrost_types::{Publication, Record};

use crate::v1;

pub fn record_to_proto(record: Record) -> v1::Record {
    v1::Record {
        version: record.version,
        originator_id: record.originator_id,
        value: record.value,
        ttl_version: record.ttl_version,
        ttl_ms: record.ttl_ms,
        hash: record.hash,
    }
}

pub fn record_from_proto(record: v1::Record) -> Record {
    Record {
        version: record.version,
        originator_id: record.originator_id,
        value: record.value,
        ttl_version: record.ttl_version,
        ttl_ms: record.ttl_ms,
        hash: record.hash,
    }
}

pub fn key_vals_to_proto(key_vals: HashMap<String, Record>) -> HashMap<String, v1::Record> {
    key_vals.into_iter().map(|(k, r)| (k, record_to_proto(r))).collect()
}

pub fn key_vals_from_proto(key_vals: HashMap<String, v1::Record>) -> HashMap<String, Record> {
    key_vals.into_iter().map(|(k, r)| (k, record_from_proto(r))).collect()
}

pub fn publication_to_proto(publication: Publication) -> v1::Publication {
    v1::Publication {
        area: publication.area,
        key_vals: key_vals_to_proto(publication.key_vals),
        expired_keys: publication.expired_keys,
        tobe_updated_keys: publication.tobe_updated_keys,
    }
}

pub fn publication_from_proto(publication: v1::Publication) -> Publication {
    Publication {
        area: publication.area,
        key_vals: key_vals_from_proto(publication.key_vals),
        expired_keys: publication.expired_keys,
        tobe_updated_keys: publication.tobe_updated_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip_preserves_value_absence() {
        let refresh = Record::ttl_refresh(1, "node-a", 4, 60_000);
        let back = record_from_proto(record_to_proto(refresh.clone()));
        assert_eq!(back, refresh);
        assert!(back.value.is_none());

        let full = Record::new(2, "node-a", vec![], 60_000);
        let back = record_from_proto(record_to_proto(full.clone()));
        assert_eq!(back, full);
        // Empty payload stays a present-but-empty payload.
        assert_eq!(back.value.as_deref(), Some(&[][..]));
    }
}
