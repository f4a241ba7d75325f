//! An in-memory [`LogStore`], for tests and single-process demos. Mirrors the teacher's
//! `memstore::MemStore`: everything lives behind a single `RwLock`, nothing survives a
//! restart.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use laminar_core::event::Event;
use laminar_core::ids::{GlobalOffset, LocalOffset};
use laminar_core::log_store::{HardState, InitialState, LogStore};
use laminar_core::mutation::Mutation;

#[derive(Default)]
struct State {
    hard_state: HardState,
    mutations: BTreeMap<GlobalOffset, Mutation>,
    events: BTreeMap<String, BTreeMap<LocalOffset, Event>>,
    last_committed_offset: GlobalOffset,
}

/// An in-memory, non-durable [`LogStore`].
#[derive(Default)]
pub struct MemLogStore {
    state: RwLock<State>,
}

impl MemLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemLogStore {
    async fn get_initial_state(&self) -> anyhow::Result<InitialState> {
        let state = self.state.read().unwrap();
        Ok(InitialState { hard_state: state.hard_state.clone(), last_committed_offset: state.last_committed_offset })
    }

    async fn save_hard_state(&self, hs: &HardState) -> anyhow::Result<()> {
        self.state.write().unwrap().hard_state = hs.clone();
        Ok(())
    }

    async fn commit(&self, mutation: Mutation, events: Vec<Event>) -> anyhow::Result<()> {
        let mut state = self.state.write().unwrap();
        let offset = mutation.global_offset;
        state.mutations.insert(offset, mutation);
        for event in events {
            state.events.entry(event.topic.clone()).or_default().insert(event.local_offset, event);
        }
        state.last_committed_offset = offset;
        Ok(())
    }

    async fn fetch_mutation(&self, offset: GlobalOffset) -> anyhow::Result<Option<Mutation>> {
        Ok(self.state.read().unwrap().mutations.get(&offset).cloned())
    }

    async fn fetch_mutations(&self, start: GlobalOffset, end: GlobalOffset) -> anyhow::Result<Vec<Mutation>> {
        let state = self.state.read().unwrap();
        Ok(state.mutations.range(start..end).map(|(_, m)| m.clone()).collect())
    }

    async fn fetch_events(&self, topic: &str, start: LocalOffset, end: LocalOffset) -> anyhow::Result<Vec<Event>> {
        let state = self.state.read().unwrap();
        Ok(state.events.get(topic).map(|m| m.range(start..end).map(|(_, e)| e.clone()).collect()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use laminar_core::event::EventPayload;
    use laminar_core::ids::ClientId;
    use laminar_core::mutation::MutationPayload;

    fn mutation(offset: u64) -> Mutation {
        Mutation { term: 1, global_offset: offset, topic: "orders".into(), client_id: ClientId(1), client_nonce: offset, payload: MutationPayload::Put { key: vec![1], value: vec![2] } }
    }

    fn event(offset: u64, local: u64) -> Event {
        Event {
            term: 1,
            global_offset: offset,
            local_offset: local,
            topic: "orders".into(),
            client_id: ClientId(1),
            client_nonce: offset,
            payload: EventPayload::KeyPut { key: vec![1], value: vec![2] },
        }
    }

    #[tokio::test]
    async fn commit_then_fetch_round_trips() {
        let store = MemLogStore::new();
        store.commit(mutation(1), vec![event(1, 1)]).await.unwrap();
        store.commit(mutation(2), vec![event(2, 2)]).await.unwrap();

        let fetched = store.fetch_mutations(1, 3).await.unwrap();
        assert_eq!(fetched.len(), 2);

        let events = store.fetch_events("orders", 1, 3).await.unwrap();
        assert_eq!(events.len(), 2);

        let initial = store.get_initial_state().await.unwrap();
        assert_eq!(initial.last_committed_offset, 2);
    }

    #[tokio::test]
    async fn hard_state_persists_across_calls() {
        let store = MemLogStore::new();
        store.save_hard_state(&HardState { current_term: 4, voted_for: Some(laminar_core::ids::NodeId(9)) }).await.unwrap();
        let initial = store.get_initial_state().await.unwrap();
        assert_eq!(initial.hard_state.current_term, 4);
    }
}
