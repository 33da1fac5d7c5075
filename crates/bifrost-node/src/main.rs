mod config;

use std::net::SocketAddr;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use bifrost_server::{serve_client, serve_peer};
use bifrost_store::{KvStore, TtlExpiryTask, TtlRefreshTask};
use bifrost_sync::SyncEngine;

use config::{build_configs, parse_peer_spec, Config};

#[derive(clap::Parser, Debug)]
#[command(name = "bifrost-node", about = "Bifrost link-state KV store node")]
struct Cli {
    /// This node's originator id; must be unique across the network.
    #[arg(long)]
    node_name: String,
    #[arg(long, default_value = "0.0.0.0:17000")]
    client_addr: String,
    #[arg(long, default_value = "0.0.0.0:17001")]
    peer_addr: String,
    /// Peer specs: "id=addr" format, repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new()
        .merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("BIFROST_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    tracing::info!(
        node_name = %cli.node_name,
        client_addr = %cli.client_addr,
        peer_addr = %cli.peer_addr,
        "node starting"
    );

    let client_addr: SocketAddr = cli
        .client_addr
        .parse()
        .with_context(|| format!("invalid client_addr: {}", cli.client_addr))?;
    let peer_addr: SocketAddr = cli
        .peer_addr
        .parse()
        .with_context(|| format!("invalid peer_addr: {}", cli.peer_addr))?;

    let (store_config, sync_config) = build_configs(&cli.node_name, &config)?;
    let ttl_decrement_ms = sync_config.ttl_decrement_ms;

    let (store, flood_rx) = KvStore::new(store_config);
    let engine = SyncEngine::new(sync_config, store.clone())
        .context("failed to construct sync engine")?;

    tokio::spawn(TtlExpiryTask::new(store.clone()).run());
    tokio::spawn(TtlRefreshTask::new(store.clone()).run());
    tokio::spawn(engine.clone().run(flood_rx));

    // Statically configured peers gossip every area this node serves.
    for raw in &cli.peers {
        let spec = parse_peer_spec(raw)?;
        for area in store.areas().await {
            engine.add_peer(&area, spec.clone()).await?;
        }
    }

    tokio::try_join!(
        serve_client(client_addr, store.clone(), engine.clone()),
        serve_peer(peer_addr, store, ttl_decrement_ms),
    )?;

    Ok(())
}
