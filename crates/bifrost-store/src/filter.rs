use std::collections::BTreeSet;
use std::fmt;

use regex::RegexSet;

use bifrost_types::constants::{NODE_LABEL_RANGE_PREFIX, PREFIX_ALLOC_MARKER};
use bifrost_types::{FilterOperator, KvStoreError, Record};

/// Admission filter for incoming records.
///
/// Key-prefix patterns are anchored at the start of the key and pre-compiled
/// into a single [`RegexSet`]; compilation happens at construction so a bad
/// pattern fails at config time, not at first match.
#[derive(Debug, Clone)]
pub struct KeyFilters {
    key_prefixes: Vec<String>,
    originator_ids: BTreeSet<String>,
    regex_set: RegexSet,
    operator: FilterOperator,
}

impl KeyFilters {
    pub fn new(
        key_prefixes: Vec<String>,
        originator_ids: BTreeSet<String>,
        operator: FilterOperator,
    ) -> Result<Self, KvStoreError> {
        let anchored: Vec<String> = key_prefixes.iter().map(|p| format!("^{p}")).collect();
        let regex_set = RegexSet::new(&anchored)
            .map_err(|e| KvStoreError::Config(format!("bad key prefix pattern: {e}")))?;
        Ok(KeyFilters { key_prefixes, originator_ids, regex_set, operator })
    }

    /// Whether `record` under `key` passes this filter.
    pub fn matches(&self, key: &str, record: &Record) -> bool {
        match self.operator {
            FilterOperator::Any => self.match_any(key, record),
            FilterOperator::All => self.match_all(key, record),
        }
    }

    // Union semantics: a hit on either attribute admits the record. With
    // nothing configured there is nothing to match against — admit all.
    fn match_any(&self, key: &str, record: &Record) -> bool {
        if self.key_prefixes.is_empty() && self.originator_ids.is_empty() {
            return true;
        }
        if !self.key_prefixes.is_empty() && self.regex_set.is_match(key) {
            return true;
        }
        if !self.originator_ids.is_empty() && self.originator_ids.contains(&record.originator_id) {
            return true;
        }
        false
    }

    // Intersection semantics: every configured attribute must match.
    fn match_all(&self, key: &str, record: &Record) -> bool {
        if !self.key_prefixes.is_empty() && !self.regex_set.is_match(key) {
            return false;
        }
        if !self.originator_ids.is_empty() && !self.originator_ids.contains(&record.originator_id) {
            return false;
        }
        true
    }

    pub fn key_prefixes(&self) -> &[String] {
        &self.key_prefixes
    }

    pub fn originator_ids(&self) -> &BTreeSet<String> {
        &self.originator_ids
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }
}

impl fmt::Display for KeyFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prefixes: [{}], originators: [{}], op: {:?}",
            self.key_prefixes.join(", "),
            self.originator_ids.iter().cloned().collect::<Vec<_>>().join(", "),
            self.operator,
        )
    }
}

/// Filter a leaf node runs on ingress: the configured lists augmented with
/// the two well-known key markers and the local node's originator id, always
/// under union semantics. Records failing it are dropped before merge and
/// never flooded onward.
pub fn leaf_node_filters(
    key_prefixes: &[String],
    originator_ids: &BTreeSet<String>,
    node_name: &str,
) -> Result<KeyFilters, KvStoreError> {
    let mut prefixes = key_prefixes.to_vec();
    prefixes.push(PREFIX_ALLOC_MARKER.to_string());
    prefixes.push(NODE_LABEL_RANGE_PREFIX.to_string());

    let mut originators = originator_ids.clone();
    originators.insert(node_name.to_string());

    KeyFilters::new(prefixes, originators, FilterOperator::Any)
}
