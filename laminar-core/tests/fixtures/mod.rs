//! An in-process test harness mirroring the teacher's `RaftRouter`: every node's Client
//! Gateway and Peer Gateway are test doubles that record responses and forward sends
//! directly into the target node's command queue, with no real socket involved.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use laminar_core::client_gateway::{ClientGateway, ClientResponse, ListenerId};
use laminar_core::cluster_config::ConfigEntry;
use laminar_core::command::Command;
use laminar_core::config::Config;
use laminar_core::core::{default_projector, Node, NodeState};
use laminar_core::event::Event;
use laminar_core::ids::{ClientId, NodeId};
use laminar_core::peer_gateway::{
    AppendMutationsRequest, PeerGateway, PeerStateMsg, ReceivedMutationsMsg, RequestVotesRequest, VoteMsg,
};
use laminar_store::MemLogStore;

pub type TestNode = Node<TestClientGateway, TestPeerGateway, MemLogStore>;

/// Records every response/event handed to it, keyed by the client or listener it was meant
/// for; tests assert against these logs instead of a real connection.
#[derive(Default)]
pub struct TestClientGateway {
    responses: Mutex<HashMap<ClientId, Vec<ClientResponse>>>,
    listener_events: Mutex<HashMap<ListenerId, Vec<Event>>>,
}

impl TestClientGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn responses(&self, client_id: ClientId) -> Vec<ClientResponse> {
        self.responses.lock().await.get(&client_id).cloned().unwrap_or_default()
    }

    pub async fn listener_events(&self, listener_id: ListenerId) -> Vec<Event> {
        self.listener_events.lock().await.get(&listener_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ClientGateway for TestClientGateway {
    async fn send_to_client(&self, client_id: ClientId, response: ClientResponse) -> anyhow::Result<()> {
        self.responses.lock().await.entry(client_id).or_default().push(response);
        Ok(())
    }

    async fn send_to_listener(&self, listener_id: ListenerId, event: Event) -> anyhow::Result<()> {
        self.listener_events.lock().await.entry(listener_id).or_default().push(event);
        Ok(())
    }

    async fn broadcast_config_change(&self, event: Event) -> anyhow::Result<()> {
        let mut all = self.listener_events.lock().await;
        let ids: Vec<ListenerId> = all.keys().copied().collect();
        for id in ids {
            all.entry(id).or_default().push(event.clone());
        }
        Ok(())
    }
}

/// A shared routing table from `NodeId` to that node's raw command sender, standing in for
/// the Framed Transport's socket multiplexing (§1: explicitly out of scope).
#[derive(Default)]
pub struct Network {
    routes: Mutex<HashMap<NodeId, mpsc::UnboundedSender<Command>>>,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, id: NodeId, tx: mpsc::UnboundedSender<Command>) {
        self.routes.lock().await.insert(id, tx);
    }

    /// Route a command to `target` directly, the way [`TestPeerGateway`] does internally.
    /// Lets a test stand in for a peer without spawning a full [`TestNode`] for it.
    pub async fn send(&self, target: NodeId, cmd: Command) -> anyhow::Result<()> {
        let routes = self.routes.lock().await;
        match routes.get(&target) {
            Some(tx) => tx.send(cmd).map_err(|_| anyhow::anyhow!("node {target} shut down")),
            None => anyhow::bail!("no route to node {target}"),
        }
    }
}

pub struct TestPeerGateway {
    self_id: NodeId,
    network: Arc<Network>,
}

impl TestPeerGateway {
    pub fn new(self_id: NodeId, network: Arc<Network>) -> Arc<Self> {
        Arc::new(Self { self_id, network })
    }

    async fn route(&self, target: NodeId, cmd: Command) -> anyhow::Result<()> {
        let routes = self.network.routes.lock().await;
        match routes.get(&target) {
            Some(tx) => tx.send(cmd).map_err(|_| anyhow::anyhow!("node {target} shut down")),
            None => anyhow::bail!("no route to node {target}"),
        }
    }
}

#[async_trait]
impl PeerGateway for TestPeerGateway {
    async fn connect(&self, target: NodeId, entry: ConfigEntry) -> anyhow::Result<()> {
        self.route(target, Command::PeerIdentity { from: self.self_id, entry }).await?;
        self.route(target, Command::PeerConnected { from: self.self_id }).await
    }

    async fn disconnect(&self, target: NodeId) -> anyhow::Result<()> {
        let _ = self.route(target, Command::PeerDisconnected { from: self.self_id }).await;
        Ok(())
    }

    async fn send_append_mutations(&self, target: NodeId, req: AppendMutationsRequest) -> anyhow::Result<()> {
        self.route(target, Command::AppendMutations { from: self.self_id, req }).await
    }

    async fn send_request_votes(&self, target: NodeId, req: RequestVotesRequest) -> anyhow::Result<()> {
        self.route(target, Command::RequestVotes { from: self.self_id, req }).await
    }

    async fn send_vote(&self, target: NodeId, msg: VoteMsg) -> anyhow::Result<()> {
        self.route(target, Command::Vote { from: self.self_id, msg }).await
    }

    async fn send_peer_state(&self, target: NodeId, msg: PeerStateMsg) -> anyhow::Result<()> {
        self.route(target, Command::PeerState { from: self.self_id, msg }).await
    }

    async fn send_received_mutations(&self, target: NodeId, msg: ReceivedMutationsMsg) -> anyhow::Result<()> {
        self.route(target, Command::ReceivedMutations { from: self.self_id, msg }).await
    }
}

/// Spawn a node wired into `network`, returning its handle plus the test doubles so
/// assertions can inspect what it sent.
pub async fn spawn_node(
    id: NodeId,
    entry: ConfigEntry,
    network: Arc<Network>,
) -> (TestNode, Arc<TestClientGateway>, Arc<TestPeerGateway>) {
    let config = Config::build("test".into()).election_timeout_min(3_000).election_timeout_max(6_000).heartbeat_interval(200).validate().unwrap();
    let client_gateway = TestClientGateway::new();
    let peer_gateway = TestPeerGateway::new(id, network.clone());
    let store = Arc::new(MemLogStore::new());
    let (tx, rx) = NodeState::command_channel();
    network.register(id, tx.clone()).await;

    let node = NodeState::spawn(id, entry, config, client_gateway.clone(), peer_gateway.clone(), store, default_projector(), tx, rx)
        .await
        .unwrap();
    (node, client_gateway, peer_gateway)
}

pub fn entry(id: u128, port: u16) -> ConfigEntry {
    ConfigEntry {
        node_id: NodeId(id),
        cluster_addr: format!("127.0.0.1:{port}").parse().unwrap(),
        client_addr: format!("127.0.0.1:{}", port + 1).parse().unwrap(),
    }
}
