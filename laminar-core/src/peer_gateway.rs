//! The Peer Gateway collaborator contract and replication wire messages (§2, §4.5).
//!
//! As with [`crate::client_gateway`], this module defines only the *outbound* half: the
//! interface `NodeState` calls into to push messages at peers. Unlike `RaftNetwork<D>` in
//! the teacher (a request/response RPC the core awaits inline), sends here are
//! fire-and-forget per §5 ("disk writes and peer sends are fire-and-forget; their
//! completions come back as new commands") — a peer's reply arrives later as a
//! [`crate::command::Command`] the gateway enqueues on the very same command queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cluster_config::ConfigEntry;
use crate::ids::{GlobalOffset, NodeId, Term};
use crate::mutation::Mutation;

/// Downstream, leader → follower (§4.5).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppendMutationsRequest {
    pub term: Term,
    pub previous_offset: GlobalOffset,
    pub previous_term: Term,
    /// Zero entries is a HEARTBEAT (§4.5).
    pub entries: Vec<Mutation>,
    pub last_committed_offset: GlobalOffset,
}

impl AppendMutationsRequest {
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Downstream, leader → follower (§4.1, §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVotesRequest {
    pub new_term: Term,
    pub last_received_term: Term,
    pub last_received_offset: GlobalOffset,
}

/// Upstream, follower → leader (§4.5): reports the follower's current tail, either in
/// response to IDENTITY or as a NACK after a term mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStateMsg {
    pub last_received_offset: GlobalOffset,
}

/// Upstream, follower → leader (§4.5): acknowledges successful append.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMutationsMsg {
    pub offset_acked: GlobalOffset,
}

/// Upstream, candidate's peer → candidate (§4.1, §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMsg {
    pub term: Term,
    pub granted: bool,
}

/// The outbound interface `NodeState` uses to talk to cluster peers.
#[async_trait]
pub trait PeerGateway: Send + Sync + 'static {
    /// Open (or re-open) the logical connection to `target` and send it this node's
    /// identity (§2, §4.5).
    async fn connect(&self, target: NodeId, entry: ConfigEntry) -> anyhow::Result<()>;

    /// Tear down the logical connection to `target` — called when no active config
    /// references it any longer (§4.4, §4.9).
    async fn disconnect(&self, target: NodeId) -> anyhow::Result<()>;

    /// Send an APPEND_MUTATIONS (or, with empty `entries`, a HEARTBEAT) to `target`
    /// (§4.5). Fire-and-forget: the follower's reply arrives later via the command queue.
    async fn send_append_mutations(&self, target: NodeId, req: AppendMutationsRequest) -> anyhow::Result<()>;

    /// Send a REQUEST_VOTES to `target` (§4.1, §4.5). Fire-and-forget.
    async fn send_request_votes(&self, target: NodeId, req: RequestVotesRequest) -> anyhow::Result<()>;

    /// Send a VOTE response to `target`, the candidate that asked (§4.1, §4.5).
    /// Fire-and-forget.
    async fn send_vote(&self, target: NodeId, msg: VoteMsg) -> anyhow::Result<()>;

    /// Upstream, follower → leader: report this node's current tail, either right after
    /// IDENTITY or as a NACK after a term mismatch (§4.5). Fire-and-forget.
    async fn send_peer_state(&self, target: NodeId, msg: PeerStateMsg) -> anyhow::Result<()>;

    /// Upstream, follower → leader: acknowledge a successful append (§4.5). Fire-and-forget.
    async fn send_received_mutations(&self, target: NodeId, msg: ReceivedMutationsMsg) -> anyhow::Result<()>;
}
