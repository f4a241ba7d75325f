//! The in-flight mutation buffer (§3, §4.2, §9): a dense queue of
//! `(mutation, event-batch, previous-term)` tuples indexed by a rolling `base_offset`.

use std::collections::VecDeque;

use crate::event::EventPayload;
use crate::ids::{GlobalOffset, Term};
use crate::mutation::Mutation;

/// One buffered tuple: the mutation itself, its pre-computed event batch (empty for
/// UPDATE_CONFIG), and the term of the entry immediately preceding it (used by the rewind
/// protocol, §4.2/§4.5).
#[derive(Clone, Debug)]
pub struct BufferedEntry {
    pub mutation: Mutation,
    pub events: Vec<EventPayload>,
    pub previous_term: Term,
    /// Set when the projector rejected this mutation at accept time (§4.7, §7): the
    /// mutation still commits, with `events` empty and this text surfaced to the client.
    pub projector_error: Option<String>,
}

/// The in-flight buffer. Invariant: `base_offset + entries.len() == next_offset()`, entries
/// are contiguous with no gaps, and each entry's term is >= the term of its predecessor
/// (§4.2).
#[derive(Clone, Debug)]
pub struct InFlightBuffer {
    base_offset: GlobalOffset,
    entries: VecDeque<BufferedEntry>,
}

impl InFlightBuffer {
    /// `base_offset` is the global offset that would be assigned to the *next* appended
    /// entry when the buffer is empty (i.e. one past the last committed offset).
    pub fn new(base_offset: GlobalOffset) -> Self {
        Self { base_offset, entries: VecDeque::new() }
    }

    pub fn base_offset(&self) -> GlobalOffset {
        self.base_offset
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The offset that will be assigned to the next appended entry.
    pub fn next_offset(&self) -> GlobalOffset {
        self.base_offset + self.entries.len() as u64
    }

    /// The offset of the most recently appended (or initial base - 1 if empty) entry.
    pub fn last_offset(&self) -> GlobalOffset {
        self.next_offset().saturating_sub(1)
    }

    fn index_of(&self, offset: GlobalOffset) -> Option<usize> {
        if offset < self.base_offset || offset >= self.next_offset() {
            return None;
        }
        Some((offset - self.base_offset) as usize)
    }

    /// Append a new entry. The caller is responsible for assigning `mutation.global_offset
    /// == self.next_offset()` before calling (§4.2, §4.3).
    pub fn append(&mut self, entry: BufferedEntry) {
        debug_assert_eq!(entry.mutation.global_offset, self.next_offset());
        self.entries.push_back(entry);
    }

    /// Look up the buffered entry at `offset`, if any is currently in memory.
    pub fn peek(&self, offset: GlobalOffset) -> Option<&BufferedEntry> {
        self.index_of(offset).map(|i| &self.entries[i])
    }

    pub fn term_of(&self, offset: GlobalOffset) -> Option<Term> {
        if offset == self.base_offset.saturating_sub(1) {
            // The entry immediately preceding the buffer's base is tracked by whoever
            // owns the buffer (the committed prefix's last term); callers pass that in
            // separately when it matters. Here we only know about buffered entries.
            return None;
        }
        self.peek(offset).map(|e| e.mutation.term)
    }

    /// Drop every buffered entry from `offset` to the tail (inclusive), per the follower's
    /// term-mismatch recovery rule (§4.2): "drops the tail from that offset forward".
    pub fn drop_tail_from(&mut self, offset: GlobalOffset) {
        if let Some(i) = self.index_of(offset) {
            self.entries.truncate(i);
        }
    }

    /// Remove and return the oldest buffered entry, advancing `base_offset`. Used once an
    /// entry has committed (§4.4).
    pub fn pop_committed(&mut self) -> Option<BufferedEntry> {
        let entry = self.entries.pop_front()?;
        self.base_offset += 1;
        Some(entry)
    }

    /// Iterate buffered entries in ascending offset order without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = &BufferedEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClientId;
    use crate::mutation::MutationPayload;

    fn entry(offset: u64, term: u64, previous_term: u64) -> BufferedEntry {
        BufferedEntry {
            mutation: Mutation {
                term,
                global_offset: offset,
                topic: "t".into(),
                client_id: ClientId(1),
                client_nonce: offset,
                payload: MutationPayload::DestroyTopic,
            },
            events: vec![],
            previous_term,
            projector_error: None,
        }
    }

    #[test]
    fn append_advances_next_offset_densely() {
        let mut buf = InFlightBuffer::new(1);
        buf.append(entry(1, 1, 0));
        buf.append(entry(2, 1, 1));
        assert_eq!(buf.next_offset(), 3);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn drop_tail_from_truncates_and_preserves_base() {
        let mut buf = InFlightBuffer::new(1);
        buf.append(entry(1, 1, 0));
        buf.append(entry(2, 1, 1));
        buf.drop_tail_from(2);
        assert_eq!(buf.next_offset(), 2);
        assert!(buf.peek(2).is_none());
        assert!(buf.peek(1).is_some());
    }

    #[test]
    fn pop_committed_advances_base_offset() {
        let mut buf = InFlightBuffer::new(1);
        buf.append(entry(1, 1, 0));
        buf.append(entry(2, 1, 1));
        let popped = buf.pop_committed().unwrap();
        assert_eq!(popped.mutation.global_offset, 1);
        assert_eq!(buf.base_offset(), 2);
        assert!(buf.peek(1).is_none());
        assert!(buf.peek(2).is_some());
    }
}
