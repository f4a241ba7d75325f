//! The Framed Transport (§2, §6): a plain, non-multiplexed `tokio::net::TcpListener`/
//! `TcpStream` implementation of [`ClientGateway`] and [`PeerGateway`]. Every message is a
//! 2-byte big-endian length prefix followed by a `serde_json`-encoded payload (§6); the core
//! never sees a socket, only the two outbound trait surfaces.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream,
};
use tokio::sync::{mpsc, Mutex};

use laminar_core::client_gateway::{ClientGateway, ClientRequest, ClientResponse, ListenerId, MutateRequest};
use laminar_core::cluster_config::ConfigEntry;
use laminar_core::command::Command;
use laminar_core::event::Event;
use laminar_core::ids::{ClientId, GlobalOffset, LocalOffset, NodeId, Nonce};
use laminar_core::peer_gateway::{
    AppendMutationsRequest, PeerGateway, PeerStateMsg, ReceivedMutationsMsg, RequestVotesRequest, VoteMsg,
};
use laminar_core::wire::MAX_FRAME_LEN;

/// Read one length-prefixed frame off `reader`, or `Ok(None)` on a clean EOF.
async fn read_frame(reader: &mut OwnedReadHalf) -> anyhow::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

async fn write_frame(writer: &mut OwnedWriteHalf, payload: &[u8]) -> anyhow::Result<()> {
    anyhow::ensure!(payload.len() <= MAX_FRAME_LEN, "frame payload of {} bytes exceeds the {MAX_FRAME_LEN}-byte limit", payload.len());
    writer.write_all(&(payload.len() as u16).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

fn spawn_writer<T: Serialize + Send + 'static>(mut write_half: OwnedWriteHalf) -> mpsc::UnboundedSender<T> {
    let (tx, mut rx) = mpsc::unbounded_channel::<T>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let bytes = match serde_json::to_vec(&msg) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode outbound frame");
                    continue;
                }
            };
            if let Err(e) = write_frame(&mut write_half, &bytes).await {
                tracing::warn!(error = %e, "peer connection write failed, dropping");
                break;
            }
        }
    });
    tx
}

// ---------------------------------------------------------------------------------------
// Peer Gateway
// ---------------------------------------------------------------------------------------

/// Every message that can cross a peer-to-peer link, in either direction (§4.1, §4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
enum PeerFrame {
    Identity { from: NodeId, entry: ConfigEntry },
    AppendMutations(AppendMutationsRequest),
    RequestVotes(RequestVotesRequest),
    Vote(VoteMsg),
    PeerState(PeerStateMsg),
    ReceivedMutations(ReceivedMutationsMsg),
}

/// A TCP-backed [`PeerGateway`]. Links are full duplex: whichever side dials `connect()`
/// also keeps reading the same socket for replies, so a single connection carries both a
/// leader's APPEND_MUTATIONS/REQUEST_VOTES downstream and a follower's VOTE/PEER_STATE/
/// RECEIVED_MUTATIONS upstream.
pub struct PeerNet {
    self_id: NodeId,
    command_tx: mpsc::UnboundedSender<Command>,
    links: Mutex<HashMap<NodeId, mpsc::UnboundedSender<PeerFrame>>>,
}

impl PeerNet {
    pub fn new(self_id: NodeId, command_tx: mpsc::UnboundedSender<Command>) -> Arc<Self> {
        Arc::new(Self { self_id, command_tx, links: Mutex::new(HashMap::new()) })
    }

    /// Accept inbound peer connections on `addr` until the process exits.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "peer gateway listening");
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(socket).await {
                    tracing::debug!(error = %e, %peer_addr, "peer connection ended");
                }
            });
        }
    }

    /// Read `PeerFrame`s off an inbound-accepted `socket` until it closes, translating each
    /// into a `Command`. The peer's identity is learned from the first `Identity` frame it
    /// sends; `connect()`-dialed sockets are handled separately since that side already
    /// knows who it is talking to.
    async fn handle_connection(self: Arc<Self>, socket: TcpStream) -> anyhow::Result<()> {
        let (mut read_half, write_half) = socket.into_split();
        let tx = spawn_writer::<PeerFrame>(write_half);

        let mut peer_id: Option<NodeId> = None;

        while let Some(payload) = read_frame(&mut read_half).await? {
            let frame: PeerFrame = match serde_json::from_slice(&payload) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed peer frame, disconnecting");
                    break;
                }
            };
            match frame {
                PeerFrame::Identity { from, entry } => {
                    if peer_id.is_none() {
                        peer_id = Some(from);
                        self.links.lock().await.insert(from, tx.clone());
                    }
                    let _ = self.command_tx.send(Command::PeerIdentity { from, entry });
                    let _ = self.command_tx.send(Command::PeerConnected { from });
                }
                PeerFrame::AppendMutations(req) => {
                    if let Some(from) = peer_id {
                        let _ = self.command_tx.send(Command::AppendMutations { from, req });
                    }
                }
                PeerFrame::RequestVotes(req) => {
                    if let Some(from) = peer_id {
                        let _ = self.command_tx.send(Command::RequestVotes { from, req });
                    }
                }
                PeerFrame::Vote(msg) => {
                    if let Some(from) = peer_id {
                        let _ = self.command_tx.send(Command::Vote { from, msg });
                    }
                }
                PeerFrame::PeerState(msg) => {
                    if let Some(from) = peer_id {
                        let _ = self.command_tx.send(Command::PeerState { from, msg });
                    }
                }
                PeerFrame::ReceivedMutations(msg) => {
                    if let Some(from) = peer_id {
                        let _ = self.command_tx.send(Command::ReceivedMutations { from, msg });
                    }
                }
            }
        }

        if let Some(id) = peer_id {
            self.links.lock().await.remove(&id);
            let _ = self.command_tx.send(Command::PeerDisconnected { from: id });
        }
        Ok(())
    }

    async fn send(&self, target: NodeId, frame: PeerFrame) -> anyhow::Result<()> {
        let links = self.links.lock().await;
        match links.get(&target) {
            Some(tx) => tx.send(frame).map_err(|_| anyhow::anyhow!("peer {target} link closed")),
            None => anyhow::bail!("no open link to peer {target}"),
        }
    }
}

#[async_trait]
impl PeerGateway for PeerNet {
    async fn connect(&self, target: NodeId, entry: ConfigEntry) -> anyhow::Result<()> {
        if self.links.lock().await.contains_key(&target) {
            return Ok(());
        }
        let socket = TcpStream::connect(entry.cluster_addr).await?;
        let (mut read_half, write_half) = socket.into_split();
        let tx = spawn_writer::<PeerFrame>(write_half);
        tx.send(PeerFrame::Identity { from: self.self_id, entry })?;
        self.links.lock().await.insert(target, tx);
        let _ = self.command_tx.send(Command::PeerConnected { from: target });

        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            loop {
                let frame = match read_frame(&mut read_half).await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "peer read failed");
                        break;
                    }
                };
                let frame: PeerFrame = match serde_json::from_slice(&frame) {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                let sent = match frame {
                    PeerFrame::Vote(msg) => command_tx.send(Command::Vote { from: target, msg }).is_ok(),
                    PeerFrame::PeerState(msg) => command_tx.send(Command::PeerState { from: target, msg }).is_ok(),
                    PeerFrame::ReceivedMutations(msg) => command_tx.send(Command::ReceivedMutations { from: target, msg }).is_ok(),
                    PeerFrame::AppendMutations(req) => command_tx.send(Command::AppendMutations { from: target, req }).is_ok(),
                    PeerFrame::RequestVotes(req) => command_tx.send(Command::RequestVotes { from: target, req }).is_ok(),
                    PeerFrame::Identity { .. } => true,
                };
                if !sent {
                    break;
                }
            }
            let _ = command_tx.send(Command::PeerDisconnected { from: target });
        });
        Ok(())
    }

    async fn disconnect(&self, target: NodeId) -> anyhow::Result<()> {
        self.links.lock().await.remove(&target);
        Ok(())
    }

    async fn send_append_mutations(&self, target: NodeId, req: AppendMutationsRequest) -> anyhow::Result<()> {
        self.send(target, PeerFrame::AppendMutations(req)).await
    }

    async fn send_request_votes(&self, target: NodeId, req: RequestVotesRequest) -> anyhow::Result<()> {
        self.send(target, PeerFrame::RequestVotes(req)).await
    }

    async fn send_vote(&self, target: NodeId, msg: VoteMsg) -> anyhow::Result<()> {
        self.send(target, PeerFrame::Vote(msg)).await
    }

    async fn send_peer_state(&self, target: NodeId, msg: PeerStateMsg) -> anyhow::Result<()> {
        self.send(target, PeerFrame::PeerState(msg)).await
    }

    async fn send_received_mutations(&self, target: NodeId, msg: ReceivedMutationsMsg) -> anyhow::Result<()> {
        self.send(target, PeerFrame::ReceivedMutations(msg)).await
    }
}

// ---------------------------------------------------------------------------------------
// Client Gateway
// ---------------------------------------------------------------------------------------

/// Inbound client-connection messages (§4.3, §4.6, §4.8). `Subscribe` has no counterpart in
/// [`ClientRequest`] because `ListenerId` assignment is this gateway's own concern (§4.8),
/// not the core's.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum ClientWireRequest {
    Handshake { client_id: ClientId },
    Reconnect { client_id: ClientId, last_known_commit_offset: GlobalOffset, first_resent_nonce: Nonce },
    Mutate { client_id: ClientId, nonce: Nonce, request: MutateRequest },
    Subscribe { topic: String, from_local_offset: LocalOffset },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum ClientWireResponse {
    Response(ClientResponse),
    ListenerEvent(Event),
}

/// A TCP-backed [`ClientGateway`]. One connection may both submit mutations (as a client)
/// and subscribe listeners (as a listener); the protocol distinguishes them by message kind,
/// not by connection (§2: "accepts client/listener connections").
pub struct ClientNet {
    command_tx: mpsc::UnboundedSender<Command>,
    next_listener_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, mpsc::UnboundedSender<ClientWireResponse>>>,
    listeners: Mutex<HashMap<ListenerId, mpsc::UnboundedSender<ClientWireResponse>>>,
}

impl ClientNet {
    pub fn new(command_tx: mpsc::UnboundedSender<Command>) -> Arc<Self> {
        Arc::new(Self { command_tx, next_listener_id: AtomicU64::new(1), clients: Mutex::new(HashMap::new()), listeners: Mutex::new(HashMap::new()) })
    }

    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "client gateway listening");
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(socket).await {
                    tracing::debug!(error = %e, %peer_addr, "client connection ended");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream) -> anyhow::Result<()> {
        let (mut read_half, write_half) = socket.into_split();
        let tx = spawn_writer::<ClientWireResponse>(write_half);

        let mut client_id: Option<ClientId> = None;
        let mut listener_ids = Vec::new();

        while let Some(payload) = read_frame(&mut read_half).await? {
            let req: ClientWireRequest = match serde_json::from_slice(&payload) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed client frame, disconnecting");
                    break;
                }
            };
            match req {
                ClientWireRequest::Handshake { client_id: id } => {
                    client_id = Some(id);
                    self.clients.lock().await.insert(id, tx.clone());
                    let _ = self.command_tx.send(Command::ClientRequest(ClientRequest::Handshake { client_id: id }));
                }
                ClientWireRequest::Reconnect { client_id: id, last_known_commit_offset, first_resent_nonce } => {
                    client_id = Some(id);
                    self.clients.lock().await.insert(id, tx.clone());
                    let _ = self.command_tx.send(Command::ClientRequest(ClientRequest::Reconnect {
                        client_id: id,
                        last_known_commit_offset,
                        first_resent_nonce,
                    }));
                }
                ClientWireRequest::Mutate { client_id: id, nonce, request } => {
                    let _ = self.command_tx.send(Command::ClientRequest(ClientRequest::Mutate { client_id: id, nonce, request }));
                }
                ClientWireRequest::Subscribe { topic, from_local_offset } => {
                    let listener_id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
                    listener_ids.push(listener_id);
                    self.listeners.lock().await.insert(listener_id, tx.clone());
                    let _ = self.command_tx.send(Command::ListenerSubscribe { listener_id, topic, from_local_offset });
                }
            }
        }

        if let Some(id) = client_id {
            self.clients.lock().await.remove(&id);
        }
        let mut listeners = self.listeners.lock().await;
        for listener_id in listener_ids {
            listeners.remove(&listener_id);
            let _ = self.command_tx.send(Command::ListenerUnsubscribe { listener_id });
        }
        Ok(())
    }
}

#[async_trait]
impl ClientGateway for ClientNet {
    async fn send_to_client(&self, client_id: ClientId, response: ClientResponse) -> anyhow::Result<()> {
        let clients = self.clients.lock().await;
        match clients.get(&client_id) {
            Some(tx) => tx.send(ClientWireResponse::Response(response)).map_err(|_| anyhow::anyhow!("client {client_id} disconnected")),
            None => Ok(()),
        }
    }

    async fn send_to_listener(&self, listener_id: ListenerId, event: Event) -> anyhow::Result<()> {
        let listeners = self.listeners.lock().await;
        match listeners.get(&listener_id) {
            Some(tx) => tx.send(ClientWireResponse::ListenerEvent(event)).map_err(|_| anyhow::anyhow!("listener {} gone", listener_id.0)),
            None => Ok(()),
        }
    }

    async fn broadcast_config_change(&self, event: Event) -> anyhow::Result<()> {
        let listeners = self.listeners.lock().await;
        for tx in listeners.values() {
            let _ = tx.send(ClientWireResponse::ListenerEvent(event.clone()));
        }
        Ok(())
    }
}
