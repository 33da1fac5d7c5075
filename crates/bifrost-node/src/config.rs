use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use bifrost_store::{leaf_node_filters, KeyFilters, StoreConfig};
use bifrost_sync::{PeerSpec, SyncConfig};
use bifrost_types::FilterOperator;

#[derive(Debug, Deserialize)]
pub struct KvStoreSection {
    pub areas: Vec<String>,
    pub key_ttl_ms: i64,
    pub ttl_decrement_ms: i64,
    pub set_leaf_node: bool,
    pub key_prefix_filters: Vec<String>,
    pub key_originator_id_filters: Vec<String>,
    pub filter_operator: FilterOperator,
    pub subscriber_queue_len: usize,
    pub flood_queue_len: usize,
}

#[derive(Debug, Deserialize)]
pub struct FloodRateSection {
    pub msg_per_sec: u32,
    pub burst_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct SyncSection {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub full_sync_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub peer_queue_len: usize,
}

#[derive(Debug, Deserialize)]
pub struct ObservabilitySection {
    pub log_level: String,
    pub log_format: String,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub kvstore: KvStoreSection,
    pub flood_rate: FloodRateSection,
    pub sync: SyncSection,
    pub observability: ObservabilitySection,
}

/// Validate the merged configuration and build the immutable snapshots the
/// store and sync engine are constructed from. Any problem here aborts
/// startup; nothing below this layer re-validates.
pub fn build_configs(
    node_name: &str,
    config: &Config,
) -> anyhow::Result<(StoreConfig, SyncConfig)> {
    if node_name.is_empty() {
        bail!("node_name must not be empty");
    }
    if config.kvstore.areas.is_empty() {
        bail!("at least one area is required");
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for area in &config.kvstore.areas {
        if area.is_empty() {
            bail!("area ids must not be empty");
        }
        if !seen.insert(area) {
            bail!("duplicate area id: {area}");
        }
    }
    if config.kvstore.key_ttl_ms <= 0 {
        bail!("key_ttl_ms must be positive, got {}", config.kvstore.key_ttl_ms);
    }
    if config.kvstore.ttl_decrement_ms < 0 {
        bail!("ttl_decrement_ms must not be negative");
    }
    if config.flood_rate.msg_per_sec == 0 {
        bail!("flood_rate.msg_per_sec must be positive");
    }
    if config.flood_rate.burst_size == 0 {
        bail!("flood_rate.burst_size must be positive");
    }
    if config.sync.initial_backoff_ms == 0 || config.sync.max_backoff_ms == 0 {
        bail!("sync backoff bounds must be positive");
    }
    if config.sync.full_sync_timeout_ms == 0 || config.sync.read_timeout_ms == 0 {
        bail!("sync timeouts must be positive");
    }

    let originators: BTreeSet<String> =
        config.kvstore.key_originator_id_filters.iter().cloned().collect();
    // Patterns compile here so a bad regex fails the daemon before the store
    // ever runs.
    let ingress_filters = if config.kvstore.set_leaf_node {
        Some(
            leaf_node_filters(&config.kvstore.key_prefix_filters, &originators, node_name)
                .context("invalid leaf-node filter")?,
        )
    } else if !config.kvstore.key_prefix_filters.is_empty() || !originators.is_empty() {
        Some(
            KeyFilters::new(
                config.kvstore.key_prefix_filters.clone(),
                originators,
                config.kvstore.filter_operator,
            )
            .context("invalid ingress filter")?,
        )
    } else {
        None
    };

    let store_config = StoreConfig {
        node_name: node_name.to_string(),
        areas: config.kvstore.areas.clone(),
        key_ttl_ms: config.kvstore.key_ttl_ms,
        ingress_filters,
        subscriber_queue_len: config.kvstore.subscriber_queue_len,
        flood_queue_len: config.kvstore.flood_queue_len,
    };

    let sync_config = SyncConfig {
        node_name: node_name.to_string(),
        initial_backoff: Duration::from_millis(config.sync.initial_backoff_ms),
        max_backoff: Duration::from_millis(config.sync.max_backoff_ms),
        full_sync_timeout: Duration::from_millis(config.sync.full_sync_timeout_ms),
        read_timeout: Duration::from_millis(config.sync.read_timeout_ms),
        ttl_decrement_ms: config.kvstore.ttl_decrement_ms,
        flood_msg_per_sec: config.flood_rate.msg_per_sec,
        flood_burst_size: config.flood_rate.burst_size,
        peer_queue_len: config.sync.peer_queue_len,
    };

    Ok((store_config, sync_config))
}

/// Parse one `--peer id=addr` argument into a [`PeerSpec`].
pub fn parse_peer_spec(raw: &str) -> anyhow::Result<PeerSpec> {
    let (peer_id, addr) = raw
        .split_once('=')
        .with_context(|| format!("peer spec '{raw}' must be 'id=addr'"))?;
    if peer_id.is_empty() || addr.is_empty() {
        bail!("peer spec '{raw}' must be 'id=addr'");
    }
    let address =
        if addr.contains("://") { addr.to_string() } else { format!("http://{addr}") };
    Ok(PeerSpec { peer_id: peer_id.to_string(), address })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            kvstore: KvStoreSection {
                areas: vec!["0".to_string()],
                key_ttl_ms: 300_000,
                ttl_decrement_ms: 1,
                set_leaf_node: false,
                key_prefix_filters: vec![],
                key_originator_id_filters: vec![],
                filter_operator: FilterOperator::Any,
                subscriber_queue_len: 128,
                flood_queue_len: 1_024,
            },
            flood_rate: FloodRateSection { msg_per_sec: 1_024, burst_size: 2_048 },
            sync: SyncSection {
                initial_backoff_ms: 64,
                max_backoff_ms: 8_192,
                full_sync_timeout_ms: 60_000,
                read_timeout_ms: 10_000,
                peer_queue_len: 256,
            },
            observability: ObservabilitySection {
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn defaults_validate() {
        let (store, sync) = build_configs("node-a", &base_config()).unwrap();
        assert_eq!(store.node_name, "node-a");
        assert!(store.ingress_filters.is_none());
        assert_eq!(sync.flood_msg_per_sec, 1_024);
    }

    #[test]
    fn empty_node_name_rejected() {
        assert!(build_configs("", &base_config()).is_err());
    }

    #[test]
    fn duplicate_area_rejected() {
        let mut config = base_config();
        config.kvstore.areas = vec!["0".to_string(), "0".to_string()];
        let err = build_configs("node-a", &config).unwrap_err();
        assert!(err.to_string().contains("duplicate area"));
    }

    #[test]
    fn zero_flood_rate_rejected() {
        let mut config = base_config();
        config.flood_rate.msg_per_sec = 0;
        assert!(build_configs("node-a", &config).is_err());
    }

    #[test]
    fn bad_regex_fails_at_config_time() {
        let mut config = base_config();
        config.kvstore.key_prefix_filters = vec!["adj:[".to_string()];
        assert!(build_configs("node-a", &config).is_err());
    }

    #[test]
    fn leaf_node_without_explicit_filters_gets_markers_and_self() {
        // The accepted legacy shape: leaf mode with nothing configured still
        // derives a working filter.
        let mut config = base_config();
        config.kvstore.set_leaf_node = true;
        let (store, _) = build_configs("node-a", &config).unwrap();
        let filters = store.ingress_filters.expect("leaf node must have filters");
        assert!(filters.key_prefixes().iter().any(|p| p == "allocprefix:"));
        assert!(filters.key_prefixes().iter().any(|p| p == "nodeLabel:"));
        assert!(filters.originator_ids().contains("node-a"));
    }

    #[test]
    fn explicit_filters_without_leaf_mode() {
        let mut config = base_config();
        config.kvstore.key_prefix_filters = vec!["adj:".to_string()];
        config.kvstore.filter_operator = FilterOperator::All;
        let (store, _) = build_configs("node-a", &config).unwrap();
        let filters = store.ingress_filters.unwrap();
        assert_eq!(filters.operator(), FilterOperator::All);
    }

    #[test]
    fn peer_spec_parsing() {
        let spec = parse_peer_spec("node-b=192.0.2.1:17001").unwrap();
        assert_eq!(spec.peer_id, "node-b");
        assert_eq!(spec.address, "http://192.0.2.1:17001");

        let spec = parse_peer_spec("node-b=https://host:1").unwrap();
        assert_eq!(spec.address, "https://host:1");

        assert!(parse_peer_spec("no-separator").is_err());
        assert!(parse_peer_spec("=addr").is_err());
        assert!(parse_peer_spec("id=").is_err());
    }
}
