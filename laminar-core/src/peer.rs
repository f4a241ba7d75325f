//! Per-peer replication bookkeeping the core owns exclusively (§3): `DownstreamPeer` state
//! and `SyncProgress`.

use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{GlobalOffset, NodeId, Term};

/// State the leader keeps for one remote cluster peer (§3, §4.5). Self is represented as a
/// degenerate, always-writable downstream whose `last_received_offset` advances on
/// leader-local append (§3).
#[derive(Clone, Debug)]
pub struct DownstreamPeer {
    pub node_id: NodeId,
    pub connected: bool,
    pub writable: bool,
    pub last_received_offset: GlobalOffset,
    pub last_sent_offset: GlobalOffset,
    pub next_to_send: GlobalOffset,
}

impl DownstreamPeer {
    pub fn new(node_id: NodeId, start_offset: GlobalOffset) -> Self {
        Self {
            node_id,
            connected: false,
            writable: true,
            last_received_offset: start_offset,
            last_sent_offset: start_offset,
            next_to_send: start_offset + 1,
        }
    }

    /// A downstream representing this node itself: always connected, always writable.
    pub fn new_self(node_id: NodeId, start_offset: GlobalOffset) -> Self {
        Self { connected: true, ..Self::new(node_id, start_offset) }
    }

    /// Reset replication bookkeeping for a fresh term, per §4.1 ("On entering LEADER:
    /// reset each downstream peer's next-to-send to `last_mutation_offset + 1`").
    pub fn reset_for_new_term(&mut self, last_mutation_offset: GlobalOffset) {
        self.next_to_send = last_mutation_offset + 1;
        self.writable = true;
    }
}

/// A `(config, member-set)` pair plus the function `progress()` (§3, §9): the highest
/// mutation offset acknowledged by a majority of that config's members.
#[derive(Clone, Debug)]
pub struct SyncProgress {
    members: BTreeSet<NodeId>,
    acked: BTreeMap<NodeId, GlobalOffset>,
}

impl SyncProgress {
    pub fn new(members: BTreeSet<NodeId>) -> Self {
        Self { members, acked: BTreeMap::new() }
    }

    pub fn members(&self) -> &BTreeSet<NodeId> {
        &self.members
    }

    /// Record the highest offset known to have been durably received by `node` (self
    /// included). No-op if `node` is not a member of this config.
    pub fn record(&mut self, node: NodeId, offset: GlobalOffset) {
        if !self.members.contains(&node) {
            return;
        }
        let e = self.acked.entry(node).or_insert(0);
        if offset > *e {
            *e = offset;
        }
    }

    /// The highest offset acknowledged by a strict majority of `members`.
    pub fn progress(&self) -> GlobalOffset {
        let mut values: Vec<GlobalOffset> = self.members.iter().map(|m| *self.acked.get(m).unwrap_or(&0)).collect();
        values.sort_unstable_by(|a, b| b.cmp(a));
        let majority = self.members.len() / 2 + 1;
        values.get(majority - 1).copied().unwrap_or(0)
    }
}

/// Maps the global offset of each in-flight UPDATE_CONFIG to its `SyncProgress` (§3). When
/// non-empty alongside the current config's own progress, this *is* joint consensus: more
/// than one `SyncProgress` is active at once (§9).
#[derive(Clone, Debug, Default)]
pub struct PendingConfigMap {
    pending: BTreeMap<GlobalOffset, SyncProgress>,
}

impl PendingConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, offset: GlobalOffset, progress: SyncProgress) {
        self.pending.insert(offset, progress);
    }

    pub fn remove(&mut self, offset: GlobalOffset) -> Option<SyncProgress> {
        self.pending.remove(&offset)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut SyncProgress> {
        self.pending.values_mut()
    }

    pub fn values(&self) -> impl Iterator<Item = &SyncProgress> {
        self.pending.values()
    }

    pub fn first_offset(&self) -> Option<GlobalOffset> {
        self.pending.keys().next().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;

    #[test]
    fn progress_is_the_majority_offset() {
        let mut p = SyncProgress::new(btreeset![NodeId(1), NodeId(2), NodeId(3)]);
        p.record(NodeId(1), 10);
        p.record(NodeId(2), 7);
        p.record(NodeId(3), 3);
        // sorted desc: [10, 7, 3], majority = 2 -> index 1 -> 7
        assert_eq!(p.progress(), 7);
    }

    #[test]
    fn progress_ignores_non_members() {
        let mut p = SyncProgress::new(btreeset![NodeId(1)]);
        p.record(NodeId(2), 99);
        assert_eq!(p.progress(), 0);
    }
}
