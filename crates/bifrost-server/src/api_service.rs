use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use bifrost_proto::convert::{key_vals_from_proto, key_vals_to_proto, publication_to_proto};
use bifrost_proto::v1::{
    kv_api_service_server::KvApiService, AddPeerRequest, AddPeerResponse, AreaStatus,
    DumpAllRequest, DumpAllResponse, DumpHashesRequest, DumpHashesResponse, GetKeyValsRequest,
    GetKeyValsResponse, PeerStatus, Publication, RemovePeerRequest, RemovePeerResponse,
    SetKeyValsRequest, SetKeyValsResponse, StatusRequest, StatusResponse, SubscribeRequest,
};
use bifrost_store::KvStore;
use bifrost_sync::{PeerSpec, SyncEngine};

use crate::convert::{filters_from_proto, kvstore_to_status};

/// Client-facing API: local publishers, subscribers and the admin surface.
pub struct KvApiServiceImpl {
    store: Arc<KvStore>,
    engine: Arc<SyncEngine>,
}

impl KvApiServiceImpl {
    pub fn new(store: Arc<KvStore>, engine: Arc<SyncEngine>) -> Self {
        KvApiServiceImpl { store, engine }
    }
}

#[tonic::async_trait]
impl KvApiService for KvApiServiceImpl {
    async fn set_key_vals(
        &self,
        request: Request<SetKeyValsRequest>,
    ) -> Result<Response<SetKeyValsResponse>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() {
            return Err(Status::invalid_argument("area must not be empty"));
        }
        if req.key_vals.is_empty() {
            return Err(Status::invalid_argument("key_vals must not be empty"));
        }
        let delta = self
            .store
            .set_key_vals(&req.area, key_vals_from_proto(req.key_vals))
            .await
            .map_err(kvstore_to_status)?;
        Ok(Response::new(SetKeyValsResponse { updated: key_vals_to_proto(delta.key_vals) }))
    }

    async fn get_key_vals(
        &self,
        request: Request<GetKeyValsRequest>,
    ) -> Result<Response<GetKeyValsResponse>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() {
            return Err(Status::invalid_argument("area must not be empty"));
        }
        let records = self
            .store
            .get_key_vals(&req.area, &req.keys)
            .await
            .map_err(kvstore_to_status)?;
        Ok(Response::new(GetKeyValsResponse { key_vals: key_vals_to_proto(records) }))
    }

    async fn dump_all(
        &self,
        request: Request<DumpAllRequest>,
    ) -> Result<Response<DumpAllResponse>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() {
            return Err(Status::invalid_argument("area must not be empty"));
        }
        let filters = filters_from_proto(req.filters)?;
        let records = self
            .store
            .dump_all(&req.area, filters.as_ref())
            .await
            .map_err(kvstore_to_status)?;
        Ok(Response::new(DumpAllResponse { key_vals: key_vals_to_proto(records) }))
    }

    async fn dump_hashes(
        &self,
        request: Request<DumpHashesRequest>,
    ) -> Result<Response<DumpHashesResponse>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() {
            return Err(Status::invalid_argument("area must not be empty"));
        }
        let hashes = self
            .store
            .dump_hashes(&req.area, &req.prefix)
            .await
            .map_err(kvstore_to_status)?;
        Ok(Response::new(DumpHashesResponse { key_vals: key_vals_to_proto(hashes) }))
    }

    type SubscribeStream = ReceiverStream<Result<Publication, Status>>;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() {
            return Err(Status::invalid_argument("area must not be empty"));
        }
        let filters = filters_from_proto(req.filters)?;
        let mut deltas = self
            .store
            .subscribe(&req.area, filters)
            .await
            .map_err(kvstore_to_status)?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            while let Some(publication) = deltas.recv().await {
                if tx.send(Ok(publication_to_proto(publication))).await.is_err() {
                    // Client went away; the store will drop the source
                    // subscription on its next fanout.
                    return;
                }
            }
            // The store closed the stream: this subscriber fell behind.
            let _ = tx
                .send(Err(Status::resource_exhausted(
                    "subscriber lagged; re-subscribe and re-snapshot",
                )))
                .await;
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let areas = self
            .store
            .area_summaries()
            .await
            .into_iter()
            .map(|s| AreaStatus {
                area: s.area,
                num_keys: s.num_keys as u64,
                num_subscribers: s.num_subscribers as u64,
            })
            .collect();
        let peers = self
            .engine
            .peer_statuses()
            .await
            .into_iter()
            .map(|p| PeerStatus {
                area: p.area,
                peer_id: p.peer_id,
                address: p.address,
                state: p.state.as_str().to_string(),
            })
            .collect();
        Ok(Response::new(StatusResponse {
            node_name: self.store.node_name().to_string(),
            areas,
            peers,
        }))
    }

    async fn add_peer(
        &self,
        request: Request<AddPeerRequest>,
    ) -> Result<Response<AddPeerResponse>, Status> {
        let req = request.into_inner();
        if req.area.is_empty() || req.peer_id.is_empty() || req.address.is_empty() {
            return Err(Status::invalid_argument("area, peer_id and address are required"));
        }
        let address = if req.address.contains("://") {
            req.address
        } else {
            format!("http://{}", req.address)
        };
        self.engine
            .add_peer(&req.area, PeerSpec { peer_id: req.peer_id, address })
            .await
            .map_err(kvstore_to_status)?;
        Ok(Response::new(AddPeerResponse {}))
    }

    async fn remove_peer(
        &self,
        request: Request<RemovePeerRequest>,
    ) -> Result<Response<RemovePeerResponse>, Status> {
        let req = request.into_inner();
        if !self.engine.remove_peer(&req.area, &req.peer_id).await {
            return Err(Status::not_found(format!(
                "no session for peer '{}' in area '{}'",
                req.peer_id, req.area
            )));
        }
        Ok(Response::new(RemovePeerResponse {}))
    }
}
