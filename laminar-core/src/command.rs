//! The single serialized command queue (§2, §5): every collaborator — Client Gateway, Peer
//! Gateway, Log Store, console — reaches `NodeState` exclusively by enqueueing a
//! [`Command`]. Mirrors `RaftMsg<D, R>`, the message type `async_raft::RaftCore::rx_api`
//! consumes.

use tokio::sync::oneshot;

use crate::client_gateway::{ClientRequest, ListenerId};
use crate::cluster_config::{ClusterConfig, ConfigEntry};
use crate::error::ChangeConfigError;
use crate::ids::{LocalOffset, NodeId};
use crate::peer_gateway::{AppendMutationsRequest, PeerStateMsg, ReceivedMutationsMsg, RequestVotesRequest, VoteMsg};

/// Every event that can mutate `NodeState`, in the single total order it is processed.
pub enum Command {
    /// A client message delivered by the Client Gateway (§4.3, §4.6).
    ClientRequest(ClientRequest),
    /// A listener subscription request (§4.8).
    ListenerSubscribe { listener_id: ListenerId, topic: String, from_local_offset: LocalOffset },
    ListenerUnsubscribe { listener_id: ListenerId },

    /// IDENTITY received from a peer (§2, §4.5).
    PeerIdentity { from: NodeId, entry: ConfigEntry },
    /// APPEND_MUTATIONS (or HEARTBEAT) received by a follower from its leader (§4.5).
    AppendMutations { from: NodeId, req: AppendMutationsRequest },
    /// REQUEST_VOTES received by a follower/candidate (§4.1, §4.5).
    RequestVotes { from: NodeId, req: RequestVotesRequest },
    /// PEER_STATE received by a leader from a downstream (§4.5).
    PeerState { from: NodeId, msg: PeerStateMsg },
    /// RECEIVED_MUTATIONS (ack) received by a leader from a downstream (§4.5).
    ReceivedMutations { from: NodeId, msg: ReceivedMutationsMsg },
    /// VOTE received by a candidate (§4.1, §4.5).
    Vote { from: NodeId, msg: VoteMsg },
    PeerConnected { from: NodeId },
    PeerDisconnected { from: NodeId },

    /// The Log Store failed; fatal (§7).
    LogStoreFailed { reason: String },

    /// This node's own election timer fired with no message from the current leader
    /// (§4.1).
    ElectionTimeout,
    /// This node's own heartbeat timer fired (leader only, §4.5).
    HeartbeatTick,

    /// Propose an UPDATE_CONFIG outside of the normal client-mutation path, e.g. for
    /// operator-driven membership changes (§4.3, §4.4). Every node starts as the leader of
    /// a single-member {self} config (§4.1); this is how that config grows.
    ChangeConfig { new_config: ClusterConfig, tx: oneshot::Sender<Result<(), ChangeConfigError>> },

    /// The operator console's `stop` command (§5, §6).
    Stop,
}
