//! Core identifier and offset type aliases.

use std::fmt;

/// A cluster node identifier (128-bit, per §3/§6).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u128);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A client identifier (128-bit, per §3/§6).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
pub struct ClientId(pub u128);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// The Raft-style term number. Monotonic across role transitions (§4.1).
pub type Term = u64;

/// Position of a mutation in the cluster-wide global log (1-indexed, dense, §3).
pub type GlobalOffset = u64;

/// Position of an event within its topic's log (1-indexed, dense, §3).
pub type LocalOffset = u64;

/// A per-client strictly increasing sequence number (§3, §4.3).
pub type Nonce = u64;
