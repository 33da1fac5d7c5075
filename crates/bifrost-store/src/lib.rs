pub mod filter;
pub mod merge;
pub mod store;
pub mod ttl;

pub use filter::{leaf_node_filters, KeyFilters};
pub use merge::{compare_values, dump_difference, merge_key_values, ValueCompare};
pub use store::{AreaSummary, FloodEvent, KvStore, StoreConfig};
pub use ttl::{TtlExpiryTask, TtlRefreshTask};
