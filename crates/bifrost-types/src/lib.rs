pub mod constants;
mod error;
mod record;

pub use error::KvStoreError;
pub use record::{generate_hash, Publication, Record};

/// Identifies a disjoint record namespace. Areas share code, never data.
pub type AreaId = String;

/// How the key-prefix list and originator-id set of a filter combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Union: a key is admitted if either attribute matches.
    #[default]
    Any,
    /// Intersection: every non-empty attribute list must match.
    All,
}
