use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use bifrost_types::constants::{DEFAULT_AREA, DEFAULT_KEY_TTL_MS, TTL_INFINITY};
use bifrost_types::{AreaId, KvStoreError, Publication, Record};

use crate::filter::KeyFilters;
use crate::merge::merge_key_values;

/// Immutable store parameters, fixed at startup. Runtime reconfiguration
/// swaps the whole snapshot and restarts the store.
#[derive(Debug)]
pub struct StoreConfig {
    /// This node's originator id.
    pub node_name: String,
    /// Areas this store serves. Each is a fully disjoint record namespace.
    pub areas: Vec<AreaId>,
    /// TTL attached to locally originated records and their refreshes.
    pub key_ttl_ms: i64,
    /// Ingress filter applied to peer publications (never to local setters).
    pub ingress_filters: Option<KeyFilters>,
    /// Queue depth per subscriber; overflowing it drops the subscriber.
    pub subscriber_queue_len: usize,
    /// Queue depth of the flood-event channel to the sync engine.
    pub flood_queue_len: usize,
}

impl StoreConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        StoreConfig {
            node_name: node_name.into(),
            areas: vec![DEFAULT_AREA.to_string()],
            key_ttl_ms: DEFAULT_KEY_TTL_MS,
            ingress_filters: None,
            subscriber_queue_len: 128,
            flood_queue_len: 1_024,
        }
    }
}

/// A merge delta leaving the store towards the sync engine.
///
/// `origin` names the peer the change came from so flooding can skip it;
/// `None` marks a local publisher or the TTL refresher.
#[derive(Debug, Clone)]
pub struct FloodEvent {
    pub area: AreaId,
    pub key_vals: HashMap<String, Record>,
    pub origin: Option<String>,
}

/// Per-area key count reported on the admin surface.
#[derive(Debug, Clone)]
pub struct AreaSummary {
    pub area: AreaId,
    pub num_keys: usize,
    pub num_subscribers: usize,
}

struct Subscriber {
    id: u64,
    filters: Option<KeyFilters>,
    tx: mpsc::Sender<Publication>,
}

#[derive(Default)]
struct AreaState {
    records: HashMap<String, Record>,
    /// Expiry index ordered by deadline; paired with `deadline_by_key` so a
    /// rescheduled record leaves no stale entry behind.
    deadlines: BTreeSet<(Instant, String)>,
    deadline_by_key: HashMap<String, Instant>,
    subscribers: Vec<Subscriber>,
}

struct Inner {
    areas: HashMap<AreaId, AreaState>,
}

/// The replicated key-value store: one record map per area, TTL scheduling,
/// subscriber fanout, and a flood channel feeding the sync engine.
///
/// All mutation funnels through [`merge_key_values`], so local publishers
/// and peer publications obey the same conflict-resolution order.
pub struct KvStore {
    config: Arc<StoreConfig>,
    inner: RwLock<Inner>,
    flood_tx: mpsc::Sender<FloodEvent>,
    expiry_wakeup: Notify,
    next_subscriber_id: AtomicU64,
}

impl KvStore {
    /// Build the store and hand back the flood-event receiver the sync
    /// engine consumes. TTL tasks are spawned separately (see
    /// [`crate::ttl`]).
    pub fn new(config: StoreConfig) -> (Arc<Self>, mpsc::Receiver<FloodEvent>) {
        let (flood_tx, flood_rx) = mpsc::channel(config.flood_queue_len);
        let areas = config
            .areas
            .iter()
            .map(|a| (a.clone(), AreaState::default()))
            .collect();
        let store = Arc::new(KvStore {
            config: Arc::new(config),
            inner: RwLock::new(Inner { areas }),
            flood_tx,
            expiry_wakeup: Notify::new(),
            next_subscriber_id: AtomicU64::new(1),
        });
        (store, flood_rx)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    /// Merge records submitted by a local publisher. No ingress filter is
    /// applied; the delta fans out to subscribers and to the flood channel.
    pub async fn set_key_vals(
        &self,
        area: &str,
        key_vals: HashMap<String, Record>,
    ) -> Result<Publication, KvStoreError> {
        self.apply(area, key_vals, false, None).await
    }

    /// Merge a publication received from `from_peer`. The configured ingress
    /// filter applies; rejected records are dropped silently and never
    /// flooded onward.
    pub async fn merge_peer_publication(
        &self,
        area: &str,
        key_vals: HashMap<String, Record>,
        from_peer: &str,
    ) -> Result<Publication, KvStoreError> {
        self.apply(area, key_vals, true, Some(from_peer.to_string())).await
    }

    async fn apply(
        &self,
        area: &str,
        key_vals: HashMap<String, Record>,
        filtered: bool,
        origin: Option<String>,
    ) -> Result<Publication, KvStoreError> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let state = inner
            .areas
            .get_mut(area)
            .ok_or_else(|| KvStoreError::UnknownArea(area.to_string()))?;

        let filters = if filtered { self.config.ingress_filters.as_ref() } else { None };
        let delta = merge_key_values(&mut state.records, key_vals, filters);
        if delta.is_empty() {
            return Ok(Publication::new(area));
        }

        // Every changed key gets its timer realigned with the stored TTL.
        for key in delta.keys() {
            let ttl_ms = state.records.get(key).map(|r| r.ttl_ms);
            if let Some(ttl_ms) = ttl_ms {
                state.reschedule(key, ttl_ms, now);
            }
        }
        self.expiry_wakeup.notify_one();

        let publication = Publication {
            area: area.to_string(),
            key_vals: delta.clone(),
            ..Default::default()
        };

        // Subscribers never see TTL-only refreshes; the flood channel sees
        // everything so refreshes keep propagating.
        let visible: HashMap<String, Record> = delta
            .iter()
            .filter(|(_, r)| !r.is_ttl_refresh())
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        if !visible.is_empty() {
            let sub_publication = Publication {
                area: area.to_string(),
                key_vals: visible,
                ..Default::default()
            };
            fan_out(state, &sub_publication);
        }

        let event = FloodEvent { area: area.to_string(), key_vals: delta, origin };
        if let Err(e) = self.flood_tx.try_send(event) {
            // Peers resynchronize via full sync after reconnect, but a full
            // flood queue still means updates are outrunning the network.
            warn!(area, error = %e, "flood queue full, dropping delta");
        }

        Ok(publication)
    }

    /// Current records for the given keys, by value. Missing keys are
    /// silently absent from the result.
    pub async fn get_key_vals(
        &self,
        area: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Record>, KvStoreError> {
        let inner = self.inner.read().await;
        let state = inner
            .areas
            .get(area)
            .ok_or_else(|| KvStoreError::UnknownArea(area.to_string()))?;
        Ok(keys
            .iter()
            .filter_map(|k| state.records.get(k).map(|r| (k.clone(), r.clone())))
            .collect())
    }

    /// Snapshot of the whole area, optionally filtered. Serves full-sync
    /// responses and client dumps.
    pub async fn dump_all(
        &self,
        area: &str,
        filters: Option<&KeyFilters>,
    ) -> Result<HashMap<String, Record>, KvStoreError> {
        let inner = self.inner.read().await;
        let state = inner
            .areas
            .get(area)
            .ok_or_else(|| KvStoreError::UnknownArea(area.to_string()))?;
        Ok(state
            .records
            .iter()
            .filter(|(k, r)| filters.map_or(true, |f| f.matches(k, r)))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }

    /// Value-stripped snapshot with hashes present — the compact form used
    /// for sync negotiation. `prefix` limits the dump to matching keys.
    pub async fn dump_hashes(
        &self,
        area: &str,
        prefix: &str,
    ) -> Result<HashMap<String, Record>, KvStoreError> {
        let inner = self.inner.read().await;
        let state = inner
            .areas
            .get(area)
            .ok_or_else(|| KvStoreError::UnknownArea(area.to_string()))?;
        Ok(state
            .records
            .iter()
            .filter(|(k, _)| prefix.is_empty() || k.starts_with(prefix))
            .map(|(k, r)| (k.clone(), r.without_value()))
            .collect())
    }

    /// Register a delta stream over the area. Delivery is per-key ordered;
    /// a receiver that falls `subscriber_queue_len` publications behind is
    /// dropped and must re-subscribe and re-snapshot.
    pub async fn subscribe(
        &self,
        area: &str,
        filters: Option<KeyFilters>,
    ) -> Result<mpsc::Receiver<Publication>, KvStoreError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .areas
            .get_mut(area)
            .ok_or_else(|| KvStoreError::UnknownArea(area.to_string()))?;
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue_len);
        let id = self.next_subscriber_id.fetch_add(1, AtomicOrdering::Relaxed);
        state.subscribers.push(Subscriber { id, filters, tx });
        debug!(area, subscriber = id, "subscriber registered");
        Ok(rx)
    }

    /// Keys this node originated, with their version and refresh counter.
    /// Feeds the TTL refresher; infinite-TTL records need no refresh.
    pub async fn self_originated(
        &self,
        area: &str,
    ) -> Result<Vec<(String, u64, u64)>, KvStoreError> {
        let inner = self.inner.read().await;
        let state = inner
            .areas
            .get(area)
            .ok_or_else(|| KvStoreError::UnknownArea(area.to_string()))?;
        Ok(state
            .records
            .iter()
            .filter(|(_, r)| r.originator_id == self.config.node_name && r.ttl_ms != TTL_INFINITY)
            .map(|(k, r)| (k.clone(), r.version, r.ttl_version))
            .collect())
    }

    pub async fn areas(&self) -> Vec<AreaId> {
        self.inner.read().await.areas.keys().cloned().collect()
    }

    pub async fn area_summaries(&self) -> Vec<AreaSummary> {
        let inner = self.inner.read().await;
        inner
            .areas
            .iter()
            .map(|(area, state)| AreaSummary {
                area: area.clone(),
                num_keys: state.records.len(),
                num_subscribers: state.subscribers.len(),
            })
            .collect()
    }

    /// Earliest pending expiry across all areas.
    pub(crate) async fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.read().await;
        inner
            .areas
            .values()
            .filter_map(|s| s.deadlines.first().map(|(t, _)| *t))
            .min()
    }

    pub(crate) fn expiry_wakeup(&self) -> &Notify {
        &self.expiry_wakeup
    }

    /// Remove every record whose deadline has passed and tell subscribers.
    /// Expiry is local — each node times out its own copy, so nothing is
    /// flooded.
    pub(crate) async fn expire_due(&self) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        for (area, state) in inner.areas.iter_mut() {
            let mut expired: Vec<String> = Vec::new();
            while let Some((deadline, key)) = state.deadlines.first().cloned() {
                if deadline > now {
                    break;
                }
                state.deadlines.remove(&(deadline, key.clone()));
                state.deadline_by_key.remove(&key);
                if state.records.remove(&key).is_some() {
                    expired.push(key);
                }
            }
            if expired.is_empty() {
                continue;
            }
            info!(area, count = expired.len(), "expired records");
            let publication = Publication {
                area: area.clone(),
                expired_keys: expired,
                ..Default::default()
            };
            fan_out(state, &publication);
        }
    }
}

impl AreaState {
    fn reschedule(&mut self, key: &str, ttl_ms: i64, now: Instant) {
        if let Some(old) = self.deadline_by_key.remove(key) {
            self.deadlines.remove(&(old, key.to_string()));
        }
        if ttl_ms == TTL_INFINITY {
            return;
        }
        let deadline = now + std::time::Duration::from_millis(ttl_ms as u64);
        self.deadlines.insert((deadline, key.to_string()));
        self.deadline_by_key.insert(key.to_string(), deadline);
    }
}

/// Deliver a publication to every subscriber whose filter admits part of it.
/// A full queue is a terminal error for that subscriber.
fn fan_out(state: &mut AreaState, publication: &Publication) {
    state.subscribers.retain(|sub| {
        let for_sub = match &sub.filters {
            None => publication.clone(),
            Some(filters) => {
                let key_vals: HashMap<String, Record> = publication
                    .key_vals
                    .iter()
                    .filter(|(k, r)| filters.matches(k, r))
                    .map(|(k, r)| (k.clone(), r.clone()))
                    .collect();
                Publication {
                    area: publication.area.clone(),
                    key_vals,
                    expired_keys: publication.expired_keys.clone(),
                    ..Default::default()
                }
            }
        };
        if for_sub.is_empty() {
            return true;
        }
        match sub.tx.try_send(for_sub) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = sub.id, "subscriber lagged, dropping stream");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}
