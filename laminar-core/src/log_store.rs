//! The Log Store collaborator contract (§2, §4.4, §6).
//!
//! Mirrors `RaftStorage<D, R>` in the teacher: an injected, async-trait boundary the core
//! never reaches past. The physical append-only files and their fetch cache are explicitly
//! out of scope (§1) — this trait only specifies the *contract* a store must honor: 1-indexed,
//! dense streams, commit = append + fsync, and random fetch by offset.

use async_trait::async_trait;

use crate::event::Event;
use crate::ids::{GlobalOffset, LocalOffset, NodeId, Term};
use crate::mutation::Mutation;

/// The durable term/vote record (§3: "current term ... voted-for-term"), persisted so a
/// restarted node never grants two votes in the same term.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HardState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
}

/// What a node needs on startup to rejoin the cluster at the right place (§3, §4.1).
#[derive(Clone, Debug, Default)]
pub struct InitialState {
    pub hard_state: HardState,
    pub last_committed_offset: GlobalOffset,
}

/// The Log Store's boundary. `commit` is the only write path: uncommitted mutations live
/// only in the in-flight buffer (§3, §5) and are never persisted — only a committed
/// mutation, together with the event batch it produced, is written (§4.4: "events for a
/// single mutation must land together").
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Load the durable term/vote state and the last committed offset known to this store.
    async fn get_initial_state(&self) -> anyhow::Result<InitialState>;

    /// Persist the current term and vote. Failure here is fatal (§7).
    async fn save_hard_state(&self, hs: &HardState) -> anyhow::Result<()>;

    /// Append (and fsync) one committed mutation together with the events it produced,
    /// atomically. Returns once durable. Failure here is fatal (§7: "the node terminates
    /// rather than acknowledge unpersisted commits").
    async fn commit(&self, mutation: Mutation, events: Vec<Event>) -> anyhow::Result<()>;

    /// Random fetch of a single committed mutation by global offset (§2).
    async fn fetch_mutation(&self, offset: GlobalOffset) -> anyhow::Result<Option<Mutation>>;

    /// Random fetch of a contiguous range of committed mutations, `[start, end)`. Used by
    /// the reconnect replay (§4.6) and by the lagging-peer catch-up loop (§4.5).
    async fn fetch_mutations(&self, start: GlobalOffset, end: GlobalOffset) -> anyhow::Result<Vec<Mutation>>;

    /// Random fetch of a contiguous range of a topic's committed events, `[start, end)`.
    /// Used to serve a listener that reconnects mid-stream (§4.8).
    async fn fetch_events(&self, topic: &str, start: LocalOffset, end: LocalOffset) -> anyhow::Result<Vec<Event>>;
}
