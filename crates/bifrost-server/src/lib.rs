mod api_service;
mod convert;
mod sync_service;

use std::net::SocketAddr;
use std::sync::Arc;

use tonic_reflection::server::Builder as ReflectionBuilder;

use bifrost_proto::v1::{
    kv_api_service_server::KvApiServiceServer, sync_service_server::SyncServiceServer,
};
use bifrost_store::KvStore;
use bifrost_sync::SyncEngine;

use api_service::KvApiServiceImpl;
use sync_service::SyncServiceImpl;

/// Serve the client API (publishers, subscribers, admin) on `addr`.
pub async fn serve_client(
    addr: SocketAddr,
    store: Arc<KvStore>,
    engine: Arc<SyncEngine>,
) -> anyhow::Result<()> {
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(bifrost_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .expect("failed to build reflection service");
    tracing::info!(%addr, "client gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(KvApiServiceServer::new(KvApiServiceImpl::new(store, engine)))
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}

/// Serve the peer gossip surface on `addr`.
pub async fn serve_peer(
    addr: SocketAddr,
    store: Arc<KvStore>,
    ttl_decrement_ms: i64,
) -> anyhow::Result<()> {
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(bifrost_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .expect("failed to build reflection service");
    tracing::info!(%addr, "peer gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(SyncServiceServer::new(SyncServiceImpl::new(store, ttl_decrement_ms)))
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}
