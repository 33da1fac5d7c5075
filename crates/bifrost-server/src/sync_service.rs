use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use bifrost_proto::convert::{key_vals_from_proto, key_vals_to_proto};
use bifrost_proto::v1::{
    sync_service_server::SyncService, FloodPubRequest, FloodPubResponse, HashDumpRequest,
    HashDumpResponse, KeyGetRequest, KeyValsResponse,
};
use bifrost_store::KvStore;
use bifrost_sync::decrement_ttls;

use crate::convert::kvstore_to_status;

/// Peer-facing gossip surface: hash dumps, value fetches and flood ingest.
pub struct SyncServiceImpl {
    store: Arc<KvStore>,
    ttl_decrement_ms: i64,
}

impl SyncServiceImpl {
    pub fn new(store: Arc<KvStore>, ttl_decrement_ms: i64) -> Self {
        SyncServiceImpl { store, ttl_decrement_ms }
    }
}

#[tonic::async_trait]
impl SyncService for SyncServiceImpl {
    async fn hash_dump(
        &self,
        request: Request<HashDumpRequest>,
    ) -> Result<Response<HashDumpResponse>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() {
            return Err(Status::invalid_argument("area must not be empty"));
        }
        let hashes = self
            .store
            .dump_hashes(&req.area, &req.prefix)
            .await
            .map_err(kvstore_to_status)?;
        debug!(area = %req.area, sender = %req.sender_id, count = hashes.len(), "served hash dump");
        Ok(Response::new(HashDumpResponse {
            area: req.area,
            key_vals: key_vals_to_proto(hashes),
        }))
    }

    async fn get_key_vals(
        &self,
        request: Request<KeyGetRequest>,
    ) -> Result<Response<KeyValsResponse>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() {
            return Err(Status::invalid_argument("area must not be empty"));
        }
        let records = self
            .store
            .get_key_vals(&req.area, &req.keys)
            .await
            .map_err(kvstore_to_status)?;
        let outbound = decrement_ttls(records, self.ttl_decrement_ms);
        Ok(Response::new(KeyValsResponse {
            area: req.area,
            key_vals: key_vals_to_proto(outbound),
        }))
    }

    async fn flood_publication(
        &self,
        request: Request<FloodPubRequest>,
    ) -> Result<Response<FloodPubResponse>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() {
            return Err(Status::invalid_argument("area must not be empty"));
        }
        if req.sender_id.is_empty() {
            return Err(Status::invalid_argument("sender_id must not be empty"));
        }

        let key_vals = key_vals_from_proto(req.key_vals);
        if !key_vals.is_empty() {
            self.store
                .merge_peer_publication(&req.area, key_vals, &req.sender_id)
                .await
                .map_err(kvstore_to_status)?;
        }

        // Any keys the sender wants back ride home on the response.
        let reply = if req.tobe_updated_keys.is_empty() {
            HashMap::new()
        } else {
            let records = self
                .store
                .get_key_vals(&req.area, &req.tobe_updated_keys)
                .await
                .map_err(kvstore_to_status)?;
            decrement_ttls(records, self.ttl_decrement_ms)
        };

        Ok(Response::new(FloodPubResponse {
            area: req.area,
            key_vals: key_vals_to_proto(reply),
        }))
    }
}
