//! The `laminar` node binary: wires the Framed Transport ([`net::PeerNet`],
//! [`net::ClientNet`]), a [`laminar_store`] log store, and the operator console around a
//! [`laminar_core::NodeState`] (§1, §2).

mod cli;
mod console;
mod net;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use laminar_core::cluster_config::ConfigEntry;
use laminar_core::config::Config;
use laminar_core::core::{default_projector, Node, NodeState};
use laminar_core::ids::NodeId;
use laminar_core::LogStore;
use laminar_store::{FileLogStore, MemLogStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let opt = cli::Opt::parse();
    let node_id = NodeId(opt.node_id);
    let client_addr = SocketAddr::new(opt.client_ip, opt.client_port);
    let cluster_addr = SocketAddr::new(opt.cluster_ip, opt.cluster_port);
    let self_entry = ConfigEntry { node_id, cluster_addr, client_addr };

    let config = Config::build(opt.cluster_name).validate()?;
    let (command_tx, command_rx) = NodeState::command_channel();

    let peer_net = net::PeerNet::new(node_id, command_tx.clone());
    let client_net = net::ClientNet::new(command_tx.clone());

    tokio::spawn(peer_net.clone().serve(cluster_addr));
    tokio::spawn(client_net.clone().serve(client_addr));
    tokio::spawn(console::run(command_tx.clone()));

    match opt.data {
        Some(dir) => {
            let store = Arc::new(FileLogStore::open(dir).await?);
            let node = spawn_node(node_id, self_entry, config, client_net, peer_net, store, command_tx, command_rx).await?;
            tokio::signal::ctrl_c().await?;
            node.stop()?;
        }
        None => {
            tracing::warn!("no --data directory given; running with a non-durable in-memory log store");
            let store = Arc::new(MemLogStore::new());
            let node = spawn_node(node_id, self_entry, config, client_net, peer_net, store, command_tx, command_rx).await?;
            tokio::signal::ctrl_c().await?;
            node.stop()?;
        }
    }
    Ok(())
}

async fn spawn_node<L: LogStore>(
    node_id: NodeId,
    self_entry: ConfigEntry,
    config: Arc<Config>,
    client_net: Arc<net::ClientNet>,
    peer_net: Arc<net::PeerNet>,
    store: Arc<L>,
    command_tx: tokio::sync::mpsc::UnboundedSender<laminar_core::command::Command>,
    command_rx: tokio::sync::mpsc::UnboundedReceiver<laminar_core::command::Command>,
) -> anyhow::Result<Node<net::ClientNet, net::PeerNet, L>> {
    let node =
        NodeState::spawn(node_id, self_entry, config, client_net, peer_net, store, default_projector(), command_tx, command_rx).await?;
    Ok(node)
}
