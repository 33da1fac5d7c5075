use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use bifrost_types::constants::TTL_REFRESH_DIVISOR;
use bifrost_types::Record;

use crate::store::KvStore;

/// Expires due records.
///
/// Sleeps until the earliest deadline across all areas, wakes early when a
/// merge schedules a sooner one, and removes everything that is due. Runs
/// for the lifetime of the store.
pub struct TtlExpiryTask {
    store: Arc<KvStore>,
}

impl TtlExpiryTask {
    pub fn new(store: Arc<KvStore>) -> Self {
        TtlExpiryTask { store }
    }

    pub async fn run(self) {
        loop {
            match self.store.next_deadline().await {
                None => self.store.expiry_wakeup().notified().await,
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {
                            self.store.expire_due().await;
                        }
                        // A merge may have scheduled an earlier deadline;
                        // loop around and re-evaluate.
                        _ = self.store.expiry_wakeup().notified() => {}
                    }
                }
            }
        }
    }
}

/// Keeps self-originated records alive.
///
/// Every `key_ttl / TTL_REFRESH_DIVISOR`, republishes a value-less refresh
/// (`ttl_version + 1`, full configured TTL) for each finite-TTL record this
/// node authored. The refresh runs through the normal merge path, so it
/// floods to peers but is invisible to subscribers.
pub struct TtlRefreshTask {
    store: Arc<KvStore>,
}

impl TtlRefreshTask {
    pub fn new(store: Arc<KvStore>) -> Self {
        TtlRefreshTask { store }
    }

    pub async fn run(self) {
        let key_ttl_ms = self.store.config().key_ttl_ms;
        let interval = Duration::from_millis(key_ttl_ms as u64 / TTL_REFRESH_DIVISOR as u64);
        loop {
            tokio::time::sleep(interval).await;
            for area in self.store.areas().await {
                let originated = match self.store.self_originated(&area).await {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if originated.is_empty() {
                    continue;
                }
                let node_name = self.store.node_name().to_string();
                let refreshes: HashMap<String, Record> = originated
                    .into_iter()
                    .map(|(key, version, ttl_version)| {
                        (key, Record::ttl_refresh(version, node_name.clone(), ttl_version + 1, key_ttl_ms))
                    })
                    .collect();
                debug!(area, count = refreshes.len(), "refreshing self-originated records");
                if let Err(e) = self.store.set_key_vals(&area, refreshes).await {
                    debug!(area, error = %e, "ttl refresh failed");
                }
            }
        }
    }
}
