//! `laminar-core` — the replicated, multi-topic event log consensus core.
//!
//! `NodeState` is the single-threaded coordinator described by the design: it owns Raft
//! role, term, the in-flight mutation buffer, pending-config joint consensus, downstream
//! peer progress, and commit ordering. It is generic over three collaborator traits
//! ([`ClientGateway`], [`PeerGateway`], [`LogStore`]) so that the consensus logic never
//! depends on a concrete transport or storage engine.

pub use async_trait;

pub mod error;
pub mod config;
pub mod metrics;
pub mod ids;
pub mod mutation;
pub mod event;
pub mod cluster_config;
pub mod topic;
pub mod inflight;
pub mod peer;
pub mod wire;
pub mod client_gateway;
pub mod peer_gateway;
pub mod log_store;
pub mod command;
pub mod core;

pub use crate::client_gateway::ClientGateway;
pub use crate::cluster_config::{ClusterConfig, ConfigEntry};
pub use crate::command::Command;
pub use crate::config::Config;
pub use crate::core::{Node, NodeState, Role};
pub use crate::error::{LaminarError, LaminarResult};
pub use crate::event::{Event, EventKind};
pub use crate::ids::{ClientId, GlobalOffset, LocalOffset, NodeId, Term};
pub use crate::log_store::LogStore;
pub use crate::metrics::NodeMetrics;
pub use crate::mutation::{Mutation, MutationKind};
pub use crate::peer_gateway::PeerGateway;
pub use crate::topic::{Projector, RawProjector};
