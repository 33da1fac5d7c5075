use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use bifrost_proto::convert::{key_vals_from_proto, key_vals_to_proto};
use bifrost_proto::v1::sync_service_client::SyncServiceClient;
use bifrost_proto::v1::{FloodPubRequest, HashDumpRequest, KeyGetRequest};
use bifrost_store::{dump_difference, KvStore};
use bifrost_types::constants::{
    DEFAULT_FLOOD_BURST_SIZE, DEFAULT_FLOOD_MSG_PER_SEC, DEFAULT_TTL_DECREMENT_MS,
    FULL_SYNC_TIMEOUT, READ_TIMEOUT, SYNC_INITIAL_BACKOFF, SYNC_MAX_BACKOFF, TTL_INFINITY,
};
use bifrost_types::{AreaId, KvStoreError, Publication, Record};

use crate::backoff::ExponentialBackoff;
use crate::ratelimit::{acquire, TokenBucket};

/// Sync parameters, fixed at startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub node_name: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub full_sync_timeout: Duration,
    pub read_timeout: Duration,
    /// Subtracted from finite TTLs on every outbound record.
    pub ttl_decrement_ms: i64,
    pub flood_msg_per_sec: u32,
    pub flood_burst_size: u32,
    /// Per-peer outbound publication queue depth.
    pub peer_queue_len: usize,
}

impl SyncConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        SyncConfig {
            node_name: node_name.into(),
            initial_backoff: SYNC_INITIAL_BACKOFF,
            max_backoff: SYNC_MAX_BACKOFF,
            full_sync_timeout: FULL_SYNC_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            ttl_decrement_ms: DEFAULT_TTL_DECREMENT_MS,
            flood_msg_per_sec: DEFAULT_FLOOD_MSG_PER_SEC,
            flood_burst_size: DEFAULT_FLOOD_BURST_SIZE,
            peer_queue_len: 256,
        }
    }
}

/// Where to reach a peer's sync service.
#[derive(Debug, Clone)]
pub struct PeerSpec {
    pub peer_id: String,
    /// Endpoint URI, e.g. `http://192.0.2.1:17001`.
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    InitialSync,
    Established,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::InitialSync => "initial_sync",
            SessionState::Established => "established",
        }
    }
}

enum ExitReason {
    /// Engine dropped the handle; stop for good.
    Shutdown,
    Transport(KvStoreError),
}

/// One gossip session with one peer in one area.
///
/// Runs the session lifecycle: a three-way full sync on entry, then an
/// established phase streaming flood publications until the transport fails,
/// then back to idle with exponential backoff.
pub struct PeerSession {
    config: Arc<SyncConfig>,
    store: Arc<KvStore>,
    area: AreaId,
    spec: PeerSpec,
    state_tx: watch::Sender<SessionState>,
    publications_rx: mpsc::Receiver<Publication>,
    bucket: Arc<Mutex<TokenBucket>>,
}

impl PeerSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<SyncConfig>,
        store: Arc<KvStore>,
        area: AreaId,
        spec: PeerSpec,
        state_tx: watch::Sender<SessionState>,
        publications_rx: mpsc::Receiver<Publication>,
        bucket: Arc<Mutex<TokenBucket>>,
    ) -> Self {
        PeerSession { config, store, area, spec, state_tx, publications_rx, bucket }
    }

    pub async fn run(mut self) {
        let mut backoff =
            ExponentialBackoff::new(self.config.initial_backoff, self.config.max_backoff);
        loop {
            let _ = self.state_tx.send(SessionState::InitialSync);
            match tokio::time::timeout(self.config.full_sync_timeout, self.initial_sync()).await {
                Ok(Ok(client)) => {
                    info!(area = %self.area, peer = %self.spec.peer_id, "initial sync complete");
                    backoff.reset();
                    let _ = self.state_tx.send(SessionState::Established);
                    match self.established(client).await {
                        ExitReason::Shutdown => return,
                        ExitReason::Transport(e) => {
                            warn!(area = %self.area, peer = %self.spec.peer_id, error = %e,
                                  "session transport failure");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(area = %self.area, peer = %self.spec.peer_id, error = %e,
                          "initial sync failed");
                }
                Err(_) => {
                    warn!(area = %self.area, peer = %self.spec.peer_id, "initial sync timed out");
                }
            }
            let _ = self.state_tx.send(SessionState::Idle);
            let delay = backoff.next_delay();
            debug!(area = %self.area, peer = %self.spec.peer_id, delay_ms = delay.as_millis() as u64,
                   "retrying sync after backoff");
            tokio::time::sleep(delay).await;
        }
    }

    /// Three-way full sync: pull the peer's hashes, diff against ours, fetch
    /// the keys where the peer is authoritative, push the ones where we are.
    async fn initial_sync(&self) -> Result<SyncServiceClient<Channel>, KvStoreError> {
        let mut client = SyncServiceClient::connect(self.spec.address.clone())
            .await
            .map_err(|e| KvStoreError::Transport(e.to_string()))?;

        let response = self
            .rpc(client.hash_dump(HashDumpRequest {
                area: self.area.clone(),
                sender_id: self.config.node_name.clone(),
                prefix: String::new(),
            }))
            .await?;
        let peer_hashes = key_vals_from_proto(response.key_vals);

        let my_hashes = self.store.dump_hashes(&self.area, "").await?;
        let diff = dump_difference(&self.area, &my_hashes, &peer_hashes);
        debug!(area = %self.area, peer = %self.spec.peer_id,
               to_send = diff.key_vals.len(), to_fetch = diff.tobe_updated_keys.len(),
               "computed full-sync difference");

        if !diff.tobe_updated_keys.is_empty() {
            let response = self
                .rpc(client.get_key_vals(KeyGetRequest {
                    area: self.area.clone(),
                    sender_id: self.config.node_name.clone(),
                    keys: diff.tobe_updated_keys.clone(),
                }))
                .await?;
            self.store
                .merge_peer_publication(
                    &self.area,
                    key_vals_from_proto(response.key_vals),
                    &self.spec.peer_id,
                )
                .await?;
        }

        if !diff.key_vals.is_empty() || !diff.tobe_updated_keys.is_empty() {
            // The diff ran over hash dumps, so look the full records up
            // before pushing them.
            let keys: Vec<String> = diff.key_vals.keys().cloned().collect();
            let full = self.store.get_key_vals(&self.area, &keys).await?;
            let outbound = decrement_ttls(full, self.config.ttl_decrement_ms);
            let response = self
                .rpc(client.flood_publication(FloodPubRequest {
                    area: self.area.clone(),
                    sender_id: self.config.node_name.clone(),
                    key_vals: key_vals_to_proto(outbound),
                    tobe_updated_keys: diff.tobe_updated_keys,
                }))
                .await?;
            let returned = key_vals_from_proto(response.key_vals);
            if !returned.is_empty() {
                self.store
                    .merge_peer_publication(&self.area, returned, &self.spec.peer_id)
                    .await?;
            }
        }

        Ok(client)
    }

    /// Stream flood publications until the transport fails or the engine
    /// drops us. A peer rejecting one message as malformed only costs that
    /// message, never the session.
    async fn established(&mut self, mut client: SyncServiceClient<Channel>) -> ExitReason {
        loop {
            let publication = match self.publications_rx.recv().await {
                Some(p) => p,
                None => return ExitReason::Shutdown,
            };
            acquire(&self.bucket).await;
            let outbound = decrement_ttls(publication.key_vals, self.config.ttl_decrement_ms);
            if outbound.is_empty() {
                continue;
            }
            let result = self
                .rpc(client.flood_publication(FloodPubRequest {
                    area: self.area.clone(),
                    sender_id: self.config.node_name.clone(),
                    key_vals: key_vals_to_proto(outbound),
                    tobe_updated_keys: Vec::new(),
                }))
                .await;
            match result {
                Ok(_) => {}
                Err(e @ KvStoreError::Malformed(_)) => {
                    warn!(area = %self.area, peer = %self.spec.peer_id, error = %e,
                          "peer rejected publication, dropping it");
                }
                Err(e) => return ExitReason::Transport(e),
            }
        }
    }

    /// Apply the read timeout to one outbound request. Rejections the peer
    /// decided on (bad arguments) are distinguished from transport faults so
    /// callers can keep the session alive.
    async fn rpc<T>(
        &self,
        call: impl Future<Output = Result<tonic::Response<T>, tonic::Status>>,
    ) -> Result<T, KvStoreError> {
        match tokio::time::timeout(self.config.read_timeout, call).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => match status.code() {
                tonic::Code::InvalidArgument | tonic::Code::FailedPrecondition => {
                    Err(KvStoreError::Malformed(status.to_string()))
                }
                _ => Err(KvStoreError::Transport(status.to_string())),
            },
            Err(_) => Err(KvStoreError::Timeout),
        }
    }
}

/// Shave the configured decrement off every finite TTL so a record cannot
/// circulate forever. Records the decrement would kill are dropped here
/// rather than shipped invalid.
pub fn decrement_ttls(
    key_vals: HashMap<String, Record>,
    decrement_ms: i64,
) -> HashMap<String, Record> {
    key_vals
        .into_iter()
        .filter_map(|(key, mut record)| {
            if record.ttl_ms != TTL_INFINITY {
                record.ttl_ms -= decrement_ms;
                if record.ttl_ms <= 0 {
                    return None;
                }
            }
            Some((key, record))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_skips_infinite_and_drops_dead() {
        let key_vals = HashMap::from([
            ("a".to_string(), Record::new(1, "x", b"A".to_vec(), 60_000)),
            ("b".to_string(), Record::new(1, "x", b"B".to_vec(), TTL_INFINITY)),
            ("c".to_string(), Record::new(1, "x", b"C".to_vec(), 1)),
        ]);
        let out = decrement_ttls(key_vals, 1);
        assert_eq!(out.get("a").unwrap().ttl_ms, 59_999);
        assert_eq!(out.get("b").unwrap().ttl_ms, TTL_INFINITY);
        assert!(!out.contains_key("c"));
    }

    #[test]
    fn session_state_labels() {
        assert_eq!(SessionState::Idle.as_str(), "idle");
        assert_eq!(SessionState::InitialSync.as_str(), "initial_sync");
        assert_eq!(SessionState::Established.as_str(), "established");
    }
}
