//! End-to-end gossip tests: real stores, real sync engines, real gRPC
//! transport on loopback.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bifrost_server::serve_peer;
use bifrost_store::{KvStore, StoreConfig};
use bifrost_sync::{PeerSpec, SessionState, SyncConfig, SyncEngine};
use bifrost_types::Record;

struct TestNode {
    name: String,
    store: Arc<KvStore>,
    engine: Arc<SyncEngine>,
    peer_addr: SocketAddr,
}

fn free_port_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr")
}

async fn start_node(name: &str) -> TestNode {
    let (store, flood_rx) = KvStore::new(StoreConfig::new(name));

    let mut sync_config = SyncConfig::new(name);
    sync_config.initial_backoff = Duration::from_millis(50);
    sync_config.max_backoff = Duration::from_millis(500);
    let engine = SyncEngine::new(sync_config, store.clone()).unwrap();
    tokio::spawn(engine.clone().run(flood_rx));

    let peer_addr = free_port_addr();
    let server_store = store.clone();
    tokio::spawn(async move {
        let _ = serve_peer(peer_addr, server_store, 1).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    TestNode { name: name.to_string(), store, engine, peer_addr }
}

async fn connect(a: &TestNode, b: &TestNode) {
    a.engine
        .add_peer(
            "0",
            PeerSpec { peer_id: b.name.clone(), address: format!("http://{}", b.peer_addr) },
        )
        .await
        .unwrap();
    b.engine
        .add_peer(
            "0",
            PeerSpec { peer_id: a.name.clone(), address: format!("http://{}", a.peer_addr) },
        )
        .await
        .unwrap();
}

async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn established(node: &TestNode, peer: &str) -> bool {
    node.engine
        .peer_statuses()
        .await
        .iter()
        .any(|p| p.peer_id == peer && p.state == SessionState::Established)
}

async fn has_version(node: &TestNode, key: &str, version: u64) -> bool {
    node.store
        .get_key_vals("0", &[key.to_string()])
        .await
        .unwrap()
        .get(key)
        .map(|r| r.version == version)
        .unwrap_or(false)
}

fn one(key: &str, record: Record) -> HashMap<String, Record> {
    HashMap::from([(key.to_string(), record)])
}

#[tokio::test(flavor = "multi_thread")]
async fn full_sync_reconciles_prepopulated_stores() {
    let node_a = start_node("node-a").await;
    let node_b = start_node("node-b").await;

    // Divergent state before the peers ever talk.
    node_a
        .store
        .set_key_vals("0", one("a", Record::new(2, "node-a", b"va2".to_vec(), 600_000)))
        .await
        .unwrap();
    node_a
        .store
        .set_key_vals("0", one("b", Record::new(1, "node-a", b"vb".to_vec(), 600_000)))
        .await
        .unwrap();
    node_b
        .store
        .set_key_vals("0", one("a", Record::new(1, "node-b", b"va1".to_vec(), 600_000)))
        .await
        .unwrap();
    node_b
        .store
        .set_key_vals("0", one("c", Record::new(1, "node-b", b"vc".to_vec(), 600_000)))
        .await
        .unwrap();

    connect(&node_a, &node_b).await;

    // Three-way sync: the higher version of "a" wins everywhere, and each
    // side learns the key it was missing.
    wait_for("node-b to take a@v2", || has_version(&node_b, "a", 2)).await;
    wait_for("node-b to learn b", || has_version(&node_b, "b", 1)).await;
    wait_for("node-a to learn c", || has_version(&node_a, "c", 1)).await;

    let a_val = node_a.store.get_key_vals("0", &["a".to_string()]).await.unwrap();
    assert_eq!(a_val.get("a").unwrap().value.as_deref(), Some(b"va2".as_slice()));
}

#[tokio::test(flavor = "multi_thread")]
async fn flood_propagates_after_establishment() {
    let node_a = start_node("node-a").await;
    let node_b = start_node("node-b").await;
    connect(&node_a, &node_b).await;

    wait_for("sessions established", || async {
        established(&node_a, "node-b").await && established(&node_b, "node-a").await
    })
    .await;

    node_a
        .store
        .set_key_vals("0", one("live", Record::new(1, "node-a", b"x".to_vec(), 600_000)))
        .await
        .unwrap();
    wait_for("node-b to receive flood", || has_version(&node_b, "live", 1)).await;

    // TTL was decremented on the way over.
    let received = node_b.store.get_key_vals("0", &["live".to_string()]).await.unwrap();
    assert!(received.get("live").unwrap().ttl_ms < 600_000);

    // Updates flow the other way too.
    node_b
        .store
        .set_key_vals("0", one("live", Record::new(2, "node-b", b"y".to_vec(), 600_000)))
        .await
        .unwrap();
    wait_for("node-a to receive update", || has_version(&node_a, "live", 2)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn flood_crosses_a_middle_node() {
    let node_a = start_node("node-a").await;
    let node_b = start_node("node-b").await;
    let node_c = start_node("node-c").await;

    // Line topology: a - b - c. Records from a reach c only through b's
    // re-flood, which must skip the peer it heard the update from.
    connect(&node_a, &node_b).await;
    connect(&node_b, &node_c).await;

    wait_for("all sessions established", || async {
        established(&node_a, "node-b").await
            && established(&node_b, "node-a").await
            && established(&node_b, "node-c").await
            && established(&node_c, "node-b").await
    })
    .await;

    node_a
        .store
        .set_key_vals("0", one("routed", Record::new(1, "node-a", b"z".to_vec(), 600_000)))
        .await
        .unwrap();

    wait_for("node-c to receive via node-b", || has_version(&node_c, "routed", 1)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_removal_stops_propagation() {
    let node_a = start_node("node-a").await;
    let node_b = start_node("node-b").await;
    connect(&node_a, &node_b).await;

    wait_for("sessions established", || async {
        established(&node_a, "node-b").await && established(&node_b, "node-a").await
    })
    .await;

    assert!(node_a.engine.remove_peer("0", "node-b").await);
    assert!(node_b.engine.remove_peer("0", "node-a").await);

    node_a
        .store
        .set_key_vals("0", one("orphan", Record::new(1, "node-a", b"q".to_vec(), 600_000)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(node_b
        .store
        .get_key_vals("0", &["orphan".to_string()])
        .await
        .unwrap()
        .is_empty());
}
