//! The Client Gateway collaborator contract (§2, §4.3, §4.6, §4.8).
//!
//! The *inbound* half (accepting connections, parsing frames, enforcing monotonic nonces)
//! is the collaborator's own responsibility and reaches `NodeState` only by enqueueing a
//! [`crate::command::Command`]. This module defines the *outbound* half: the interface
//! `NodeState` uses to push responses back out, mirroring how `RaftNetwork<D>` is the
//! outbound interface `RaftCore` calls into rather than a queue `RaftCore` reads from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cluster_config::ClusterConfig;
use crate::event::Event;
use crate::ids::{ClientId, GlobalOffset, Nonce, NodeId};

/// An opaque handle identifying one listener subscription, assigned by the Client Gateway
/// when it registers a (topic, last-received-local-offset) subscription (§4.8). A single
/// client connection may hold several of these (one per subscribed topic).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// A kind-specific mutation request as submitted by a client (§3, §4.3). Distinct from
/// [`crate::mutation::MutationPayload`] because the request carries a topic name argument
/// even for kinds where the committed `Mutation` stores it in the `topic` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MutateRequest {
    CreateTopic { topic: String, code: Vec<u8>, args: Vec<u8> },
    DestroyTopic { topic: String },
    Put { topic: String, key: Vec<u8>, value: Vec<u8> },
    Delete { topic: String, key: Vec<u8> },
    UpdateConfig(ClusterConfig),
}

/// A message from a client to the cluster (§2, §4.3, §4.6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientRequest {
    /// First message on a new connection: establishes the client's identity and resets its
    /// expected nonce to 1 (§4.3).
    Handshake { client_id: ClientId },
    /// Reconnect after a disconnect; triggers replay (§4.6).
    Reconnect { client_id: ClientId, last_known_commit_offset: GlobalOffset, first_resent_nonce: Nonce },
    /// A mutation submission (§4.3).
    Mutate { client_id: ClientId, nonce: Nonce, request: MutateRequest },
}

/// A response from the cluster to a client (§4.3, §4.4, §4.6, §7).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientResponse {
    /// The mutation was accepted and ordered; not yet committed (§4.3 step 7).
    Received { nonce: Nonce, last_committed_offset: GlobalOffset },
    /// The mutation committed. `error` carries a projector failure's error effect (§4.7,
    /// §7), in which case the mutation committed with zero events.
    Committed { nonce: Nonce, global_offset: GlobalOffset, error: Option<String> },
    /// This node is not the leader; the client should redirect to the named node's
    /// client-facing address (§4.1).
    Redirect { leader: Option<NodeId> },
    /// A new config committed; broadcast to connected clients (§4.4).
    ConfigUpdate(ClusterConfig),
    /// A protocol violation was rejected without changing core state (§4.3, §7).
    Error { reason: String },
    /// Reconnect replay is complete; the client should resume submitting at this nonce
    /// (§4.6).
    ClientReady { next_nonce: Nonce },
}

/// The outbound interface `NodeState` uses to deliver responses to clients and events to
/// listeners. The inbound direction (accepting connections, decoding frames, routing to
/// [`crate::command::Command`]) is the collaborator's own concern.
#[async_trait]
pub trait ClientGateway: Send + Sync + 'static {
    /// Deliver a response to the client identified by `client_id`. Gateways should queue
    /// and serialize responses to a single client in the order they are called (§4.3: "the
    /// Client Gateway ... serializes ack/commit/redirect/config-update responses").
    async fn send_to_client(&self, client_id: ClientId, response: ClientResponse) -> anyhow::Result<()>;

    /// Deliver one event to the listener subscription identified by `listener_id`, in
    /// ascending local-offset order (§4.8).
    async fn send_to_listener(&self, listener_id: ListenerId, event: Event) -> anyhow::Result<()>;

    /// Broadcast the CONFIG_CHANGE pseudo-event to every currently registered listener,
    /// out-of-band of their per-topic ordering (§4.7, §4.8).
    async fn broadcast_config_change(&self, event: Event) -> anyhow::Result<()>;
}
