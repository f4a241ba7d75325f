//! The core of Laminar: `NodeState`, the single-threaded coordinator (§2, §5) that owns
//! Raft role, term, the in-flight buffer, pending-config joint consensus, downstream peer
//! progress, and commit ordering. All collaborator callbacks reach it by enqueueing a
//! [`crate::command::Command`] onto its command channel; `NodeState::main()` is the sole
//! consumer.

mod admin;
mod client;
mod commit;
mod election;
mod follower;
mod reconnect;
mod replication;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesOrdered;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::client_gateway::{ClientGateway, ClientRequest, ListenerId};
use crate::cluster_config::{ClusterConfig, ConfigEntry};
use crate::command::Command;
use crate::config::Config;
use crate::error::ChangeConfigError;
use crate::event::Event;
use crate::ids::{ClientId, GlobalOffset, LocalOffset, NodeId, Nonce, Term};
use crate::inflight::InFlightBuffer;
use crate::log_store::LogStore;
use crate::metrics::{NodeMetrics, Wait};
use crate::peer::{DownstreamPeer, PendingConfigMap, SyncProgress};
use crate::peer_gateway::PeerGateway;
use crate::topic::{Projector, RawProjector, TopicTable};

/// The Raft-style role state machine (§4.1). Every node boots as `Leader` of its own
/// single-member bootstrap config; there is no separate "uninitialized" state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Role {
    Leader,
    Follower,
    Candidate,
}

impl Default for Role {
    fn default() -> Self {
        Role::Leader
    }
}

/// One registered listener subscription (§4.8).
pub(crate) struct ListenerSub {
    pub topic: String,
    pub next_local_offset: LocalOffset,
}

/// The outcome of an asynchronous log-store commit, carrying everything needed to apply
/// its side effects without re-inspecting the (by then popped) buffer entry.
pub(crate) struct CommitOutcome {
    pub offset: GlobalOffset,
    pub term: Term,
    pub topic: String,
    pub client_id: ClientId,
    pub client_nonce: Nonce,
    pub installs_config: Option<ClusterConfig>,
    pub projector_error: Option<String>,
    pub result: anyhow::Result<Vec<Event>>,
}

/// The single-threaded consensus core (§2, §5).
pub struct NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    pub(crate) id: NodeId,
    pub(crate) config: Arc<Config>,
    pub(crate) client_gateway: Arc<C>,
    pub(crate) peer_gateway: Arc<P>,
    pub(crate) log_store: Arc<L>,
    pub(crate) projector: Arc<dyn Projector>,

    pub(crate) role: Role,
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<NodeId>,
    pub(crate) current_leader: Option<NodeId>,

    pub(crate) current_config: ClusterConfig,
    pub(crate) current_progress: SyncProgress,
    pub(crate) pending_configs: PendingConfigMap,
    /// Parallel to `pending_configs`: the actual `ClusterConfig` payload for each pending
    /// offset, installed as `current_config` once its `SyncProgress` commits (§4.4).
    pub(crate) pending_config_payloads: BTreeMap<GlobalOffset, ClusterConfig>,

    pub(crate) buffer: InFlightBuffer,
    pub(crate) last_committed_offset: GlobalOffset,
    pub(crate) last_committed_term: Term,
    pub(crate) committed_topic_table: TopicTable,
    pub(crate) topic_local_offsets: HashMap<String, LocalOffset>,

    pub(crate) downstreams: BTreeMap<NodeId, DownstreamPeer>,
    pub(crate) client_next_nonce: HashMap<ClientId, Nonce>,
    pub(crate) listeners: HashMap<ListenerId, ListenerSub>,

    /// Valid only while `role == Candidate` (§4.1).
    pub(crate) votes_granted: BTreeSet<NodeId>,

    pub(crate) rx: mpsc::UnboundedReceiver<Command>,
    pub(crate) tx: mpsc::UnboundedSender<Command>,
    pub(crate) metrics_tx: watch::Sender<NodeMetrics>,

    pub(crate) commit_futures: FuturesOrdered<BoxFuture<'static, CommitOutcome>>,

    pub(crate) stopped: bool,
}

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    /// Build the command channel a node will read from. Collaborators (the Client Gateway,
    /// Peer Gateway, and console) are typically constructed *before* the `NodeState` they
    /// feed — each needs a sender clone to enqueue commands with — so the channel is built
    /// separately from [`NodeState::spawn`] rather than internally by it.
    pub fn command_channel() -> (mpsc::UnboundedSender<Command>, mpsc::UnboundedReceiver<Command>) {
        mpsc::unbounded_channel()
    }

    /// Spawn a new node, bootstrapped as the leader of a single-member `{self}` config
    /// (§4.1), and return its cloneable handle. `tx`/`rx` come from
    /// [`NodeState::command_channel`]; `tx` must already have been handed to every
    /// collaborator that needs to enqueue commands.
    pub async fn spawn(
        id: NodeId,
        self_entry: ConfigEntry,
        config: Arc<Config>,
        client_gateway: Arc<C>,
        peer_gateway: Arc<P>,
        log_store: Arc<L>,
        projector: Arc<dyn Projector>,
        tx: mpsc::UnboundedSender<Command>,
        rx: mpsc::UnboundedReceiver<Command>,
    ) -> anyhow::Result<Node<C, P, L>> {
        let initial = log_store.get_initial_state().await?;

        let mut members = BTreeSet::new();
        members.insert(id);
        let mut current_progress = SyncProgress::new(members);
        current_progress.record(id, initial.last_committed_offset);

        let mut downstreams = BTreeMap::new();
        downstreams.insert(id, DownstreamPeer::new_self(id, initial.last_committed_offset));

        let metrics = NodeMetrics {
            id,
            role: Role::Leader,
            current_term: initial.hard_state.current_term,
            current_leader: Some(id),
            last_received_offset: initial.last_committed_offset,
            last_committed_offset: initial.last_committed_offset,
            members: vec![id],
            in_joint_consensus: false,
        };
        let (metrics_tx, metrics_rx) = watch::channel(metrics);

        let node_state = NodeState {
            id,
            config,
            client_gateway,
            peer_gateway,
            log_store,
            projector,
            role: Role::Leader,
            current_term: initial.hard_state.current_term,
            voted_for: initial.hard_state.voted_for,
            current_leader: Some(id),
            current_config: ClusterConfig { entries: vec![self_entry] },
            current_progress,
            pending_configs: PendingConfigMap::new(),
            pending_config_payloads: BTreeMap::new(),
            buffer: InFlightBuffer::new(initial.last_committed_offset + 1),
            last_committed_offset: initial.last_committed_offset,
            last_committed_term: initial.hard_state.current_term,
            committed_topic_table: TopicTable::new(),
            topic_local_offsets: HashMap::new(),
            downstreams,
            client_next_nonce: HashMap::new(),
            listeners: HashMap::new(),
            votes_granted: BTreeSet::new(),
            rx,
            tx: tx.clone(),
            metrics_tx,
            commit_futures: FuturesOrdered::new(),
            stopped: false,
        };

        let join = tokio::spawn(node_state.main());
        Ok(Node { tx, metrics_rx, join: Some(join) })
    }

    /// The dispatch loop: re-enter the role-specific run loop every time a transition
    /// changes `self.role`, mirroring `RaftCore::main()` dispatching to
    /// `LeaderState::run()` / `FollowerState::run()` / `CandidateState::run()`.
    #[tracing::instrument(level = "debug", skip(self), fields(id = %self.id))]
    async fn main(mut self) {
        loop {
            let result = match self.role {
                Role::Leader => self.run_leader().await,
                Role::Follower => self.run_follower().await,
                Role::Candidate => self.run_candidate().await,
            };
            if let Err(err) = result {
                tracing::error!(error = %err, "node {} terminating", self.id);
                return;
            }
            if self.stopped {
                tracing::info!("node {} stopped", self.id);
                return;
            }
        }
    }

    pub(crate) fn report_metrics(&self) {
        let metrics = NodeMetrics {
            id: self.id,
            role: self.role,
            current_term: self.current_term,
            current_leader: self.current_leader,
            last_received_offset: self.buffer.last_offset(),
            last_committed_offset: self.last_committed_offset,
            members: self.current_config.node_ids().into_iter().collect(),
            in_joint_consensus: !self.pending_configs.is_empty(),
        };
        let _ = self.metrics_tx.send(metrics);
    }

    pub(crate) fn step_down_to_follower(&mut self, term: Term) {
        self.current_term = term;
        self.voted_for = None;
        self.role = Role::Follower;
        self.votes_granted.clear();
    }

    pub(crate) async fn save_hard_state(&self) -> anyhow::Result<()> {
        self.log_store
            .save_hard_state(&crate::log_store::HardState { current_term: self.current_term, voted_for: self.voted_for })
            .await
    }

    pub(crate) fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.config.new_rand_election_timeout())
    }

    pub(crate) fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.config.heartbeat_interval)
    }

    /// Replay missed events and register a listener subscription; role-agnostic, so every
    /// role's run loop forwards this command here (§4.8).
    pub(crate) async fn handle_listener_subscribe(
        &mut self,
        listener_id: ListenerId,
        topic: String,
        from_local_offset: LocalOffset,
    ) -> anyhow::Result<()> {
        let caught_up = *self.topic_local_offsets.get(&topic).unwrap_or(&0);
        if from_local_offset < caught_up {
            let events = self.log_store.fetch_events(&topic, from_local_offset + 1, caught_up + 1).await?;
            for event in events {
                self.client_gateway.send_to_listener(listener_id, event).await?;
            }
        }
        self.listeners.insert(listener_id, ListenerSub { topic, next_local_offset: caught_up.max(from_local_offset) + 1 });
        Ok(())
    }
}

/// A cloneable handle to a running `NodeState`, mirroring `async_raft::Raft`.
pub struct Node<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    tx: mpsc::UnboundedSender<Command>,
    metrics_rx: watch::Receiver<NodeMetrics>,
    join: Option<JoinHandle<()>>,
}

impl<C, P, L> Clone for Node<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), metrics_rx: self.metrics_rx.clone(), join: None }
    }
}

impl<C, P, L> Node<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    /// Submit a client message (§4.3, §4.6).
    pub fn submit_client_request(&self, request: ClientRequest) -> anyhow::Result<()> {
        self.tx.send(Command::ClientRequest(request)).map_err(|_| anyhow::anyhow!("node is shut down"))
    }

    /// Enqueue any `Command` directly. The Client Gateway, Peer Gateway, and console all
    /// reach `NodeState` this way (§2, §5); the narrower methods below exist only for
    /// callers (tests, the admin CLI path) that would otherwise have to construct a
    /// `Command` by hand.
    pub fn dispatch(&self, cmd: Command) -> anyhow::Result<()> {
        self.tx.send(cmd).map_err(|_| anyhow::anyhow!("node is shut down"))
    }

    pub fn subscribe_listener(&self, listener_id: ListenerId, topic: String, from_local_offset: LocalOffset) -> anyhow::Result<()> {
        self.tx
            .send(Command::ListenerSubscribe { listener_id, topic, from_local_offset })
            .map_err(|_| anyhow::anyhow!("node is shut down"))
    }

    pub fn unsubscribe_listener(&self, listener_id: ListenerId) -> anyhow::Result<()> {
        self.tx.send(Command::ListenerUnsubscribe { listener_id }).map_err(|_| anyhow::anyhow!("node is shut down"))
    }

    /// Propose an UPDATE_CONFIG directly (used by tests and the CLI in lieu of a full
    /// client connection).
    pub async fn change_config(&self, new_config: ClusterConfig) -> Result<(), ChangeConfigError> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::ChangeConfig { new_config, tx }).is_err() {
            return Err(ChangeConfigError::NotLeader);
        }
        rx.await.unwrap_or(Err(ChangeConfigError::NotLeader))
    }

    pub fn metrics(&self) -> watch::Receiver<NodeMetrics> {
        self.metrics_rx.clone()
    }

    pub fn wait(&self, timeout: Duration) -> Wait {
        Wait { rx: self.metrics_rx.clone(), timeout }
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.tx.send(Command::Stop).map_err(|_| anyhow::anyhow!("node already shut down"))
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        let _ = self.stop();
        if let Some(j) = self.join.take() {
            j.await?;
        }
        Ok(())
    }
}

/// The default projector: non-programmable (raw) topics only (§4.7).
pub fn default_projector() -> Arc<dyn Projector> {
    Arc::new(RawProjector)
}
