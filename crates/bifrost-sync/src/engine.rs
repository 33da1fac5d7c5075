use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bifrost_store::{FloodEvent, KvStore};
use bifrost_types::{AreaId, KvStoreError, Publication};

use crate::ratelimit::TokenBucket;
use crate::session::{PeerSession, PeerSpec, SessionState, SyncConfig};

/// Snapshot of one peer session for the admin surface.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub area: AreaId,
    pub peer_id: String,
    pub address: String,
    pub state: SessionState,
}

struct PeerHandle {
    spec: PeerSpec,
    state_rx: watch::Receiver<SessionState>,
    publications_tx: mpsc::Sender<Publication>,
    task: JoinHandle<()>,
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns one [`PeerSession`] per (area, peer) and pumps store deltas to every
/// established session except the one the change came from.
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    store: Arc<KvStore>,
    bucket: Arc<Mutex<TokenBucket>>,
    peers: RwLock<HashMap<(AreaId, String), PeerHandle>>,
}

impl SyncEngine {
    /// Fails when the flood rate parameters are invalid.
    pub fn new(config: SyncConfig, store: Arc<KvStore>) -> Result<Arc<Self>, KvStoreError> {
        let bucket = TokenBucket::new(config.flood_msg_per_sec, config.flood_burst_size)?;
        Ok(Arc::new(SyncEngine {
            config: Arc::new(config),
            store,
            bucket: Arc::new(Mutex::new(bucket)),
            peers: RwLock::new(HashMap::new()),
        }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Peer-up: start a session. An existing session for the same (area,
    /// peer) is torn down first, so a re-add behaves like a peer restart.
    pub async fn add_peer(&self, area: &str, spec: PeerSpec) -> Result<(), KvStoreError> {
        if !self.store.areas().await.contains(&area.to_string()) {
            return Err(KvStoreError::UnknownArea(area.to_string()));
        }
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (publications_tx, publications_rx) = mpsc::channel(self.config.peer_queue_len);
        let session = PeerSession::new(
            self.config.clone(),
            self.store.clone(),
            area.to_string(),
            spec.clone(),
            state_tx,
            publications_rx,
            self.bucket.clone(),
        );
        let task = tokio::spawn(session.run());
        let handle = PeerHandle { spec: spec.clone(), state_rx, publications_tx, task };

        let mut peers = self.peers.write().await;
        if peers.insert((area.to_string(), spec.peer_id.clone()), handle).is_some() {
            debug!(area, peer = %spec.peer_id, "replaced existing session");
        }
        info!(area, peer = %spec.peer_id, address = %spec.address, "peer added");
        Ok(())
    }

    /// Peer-down: stop and forget the session.
    pub async fn remove_peer(&self, area: &str, peer_id: &str) -> bool {
        let removed = self
            .peers
            .write()
            .await
            .remove(&(area.to_string(), peer_id.to_string()))
            .is_some();
        if removed {
            info!(area, peer = peer_id, "peer removed");
        }
        removed
    }

    pub async fn peer_statuses(&self) -> Vec<PeerStatus> {
        let peers = self.peers.read().await;
        peers
            .iter()
            .map(|((area, peer_id), handle)| PeerStatus {
                area: area.clone(),
                peer_id: peer_id.clone(),
                address: handle.spec.address.clone(),
                state: *handle.state_rx.borrow(),
            })
            .collect()
    }

    /// Flood pump: runs for the life of the store, distributing every merge
    /// delta to established peers in the same area, skipping the peer the
    /// delta originated from.
    pub async fn run(self: Arc<Self>, mut flood_rx: mpsc::Receiver<FloodEvent>) {
        while let Some(event) = flood_rx.recv().await {
            let peers = self.peers.read().await;
            for ((area, peer_id), handle) in peers.iter() {
                if *area != event.area {
                    continue;
                }
                if event.origin.as_deref() == Some(peer_id.as_str()) {
                    continue;
                }
                if *handle.state_rx.borrow() != SessionState::Established {
                    continue;
                }
                let publication = Publication {
                    area: event.area.clone(),
                    key_vals: event.key_vals.clone(),
                    ..Default::default()
                };
                if handle.publications_tx.try_send(publication).is_err() {
                    // The session will reconcile via full sync once it
                    // drains; nothing is lost permanently.
                    warn!(area, peer = %peer_id, "peer flood queue full, dropping delta");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_store::StoreConfig;

    fn engine() -> (Arc<SyncEngine>, Arc<KvStore>) {
        let (store, _flood) = KvStore::new(StoreConfig::new("node-a"));
        let engine = SyncEngine::new(SyncConfig::new("node-a"), store.clone()).unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn add_and_remove_peer_tracks_status() {
        let (engine, _store) = engine();
        engine
            .add_peer(
                "0",
                PeerSpec { peer_id: "node-b".into(), address: "http://127.0.0.1:1".into() },
            )
            .await
            .unwrap();

        let statuses = engine.peer_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].peer_id, "node-b");

        assert!(engine.remove_peer("0", "node-b").await);
        assert!(engine.peer_statuses().await.is_empty());
        assert!(!engine.remove_peer("0", "node-b").await);
    }

    #[tokio::test]
    async fn add_peer_unknown_area_rejected() {
        let (engine, _store) = engine();
        let err = engine
            .add_peer(
                "nope",
                PeerSpec { peer_id: "node-b".into(), address: "http://127.0.0.1:1".into() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KvStoreError::UnknownArea(_)));
    }

    #[tokio::test]
    async fn invalid_flood_rate_rejected() {
        let (store, _flood) = KvStore::new(StoreConfig::new("node-a"));
        let mut config = SyncConfig::new("node-a");
        config.flood_msg_per_sec = 0;
        assert!(SyncEngine::new(config, store).is_err());
    }
}
