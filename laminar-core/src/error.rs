//! The error types returned across `laminar-core`'s API boundary.
//!
//! Mirrors the teacher's split: collaborator traits ([`crate::LogStore`],
//! [`crate::ClientGateway`], [`crate::PeerGateway`]) return `anyhow::Result<T>` since their
//! failures are either transient (retried by the caller) or fatal (folded into
//! [`LaminarError`] by the core); narrow, typed errors are reserved for the handful of
//! request/response RPCs the public API exposes.

use thiserror::Error;

use crate::ids::{GlobalOffset, NodeId};

/// Errors which cause `NodeState` to terminate (§7: "Log store failure", "Configuration
/// error at startup"). Everything else in §7 (protocol error, term mismatch, projector
/// failure on a single mutation) is recovered in place and is not a `LaminarError`.
#[derive(Clone, Debug, Error)]
pub enum LaminarError {
    #[error("fatal log store error: {0}")]
    LogStore(String),

    #[error("projector diverged across replicas at global offset {offset}")]
    ProjectorDivergence { offset: GlobalOffset },

    #[error("node is shutting down")]
    ShuttingDown,
}

pub type LaminarResult<T> = std::result::Result<T, LaminarError>;

/// Returned by `NodeState::change_config` when an UPDATE_CONFIG cannot be accepted
/// right now (§4.3, §4.4 joint consensus).
#[derive(Clone, Debug, Error)]
pub enum ChangeConfigError {
    #[error("a config change is already in flight")]
    AlreadyInJointConsensus,

    #[error("the proposed config has {0} entries, must be 1..=31")]
    InvalidSize(usize),

    #[error("node is not the current leader")]
    NotLeader,
}

/// Returned when a client-submitted mutation cannot be accepted (§4.3).
#[derive(Clone, Debug, Error)]
pub enum ClientWriteError {
    #[error("expected nonce {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("not the leader; redirect to {leader:?}")]
    Redirect { leader: Option<NodeId> },

    #[error("topic name invalid: {0}")]
    InvalidTopic(String),
}

/// A catch-all wrapper used by request/response RPC handlers that may fail either because
/// the node has gone fatal, or because of a narrower, recoverable condition.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error(transparent)]
    Fatal(#[from] LaminarError),

    #[error(transparent)]
    ChangeConfig(#[from] ChangeConfigError),

    #[error(transparent)]
    ClientWrite(#[from] ClientWriteError),
}
