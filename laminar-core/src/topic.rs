//! Per-topic state and the event projector (§4.7).
//!
//! The projector is modeled as the external collaborator contract spec.md calls for: a
//! pure, deterministic function from `(mutation, topic_state)` to `(event_batch,
//! new_topic_state)`. `RawProjector` is the only implementation shipped — the embedded
//! program runtime for *programmable* topics is explicitly out of scope (§1) — but the
//! trait boundary is real, mirroring how `RaftStorage::apply_to_state_machine` is an
//! injected boundary in the teacher rather than inlined into the consensus core.

use std::collections::HashMap;

use thiserror::Error;

use crate::mutation::{Mutation, MutationPayload};
use crate::event::EventPayload;

/// Per-topic state the projector may read and update. Held by the core, passed by
/// reference on every call (§9: "any internal mutable state it requires lives in a
/// topic-state table owned by the core").
#[derive(Clone, Debug, Default)]
pub struct TopicState {
    pub exists: bool,
}

/// The table of all topics' state, keyed by topic name.
#[derive(Clone, Debug, Default)]
pub struct TopicTable(HashMap<String, TopicState>);

impl TopicTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, topic: &str) -> TopicState {
        self.0.get(topic).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, topic: &str, state: TopicState) {
        if state.exists {
            self.0.insert(topic.to_string(), state);
        } else {
            self.0.remove(topic);
        }
    }
}

/// A projector failure (§7: "commit the mutation with a zero-event outcome and an error
/// effect; client sees COMMITTED with error code").
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProjectorError {
    #[error("topic {0:?} does not exist")]
    NoSuchTopic(String),
    #[error("topic {0:?} already exists")]
    AlreadyExists(String),
}

pub type ProjectorResult = Result<Vec<EventPayload>, ProjectorError>;

/// The deterministic mutation → event-batch projection (§4.7).
pub trait Projector: Send + Sync {
    fn project(&self, mutation: &Mutation, table: &mut TopicTable) -> ProjectorResult;
}

/// The projector for non-programmable (raw) topics: a 1:1 mapping of mutation kind to
/// event kind, per §4.7.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawProjector;

impl Projector for RawProjector {
    fn project(&self, mutation: &Mutation, table: &mut TopicTable) -> ProjectorResult {
        match &mutation.payload {
            MutationPayload::CreateTopic { code, args } => {
                let mut state = table.get(&mutation.topic);
                if state.exists {
                    return Err(ProjectorError::AlreadyExists(mutation.topic.clone()));
                }
                state.exists = true;
                table.set(&mutation.topic, state);
                Ok(vec![EventPayload::TopicCreate { code: code.clone(), args: args.clone() }])
            }
            MutationPayload::DestroyTopic => {
                let mut state = table.get(&mutation.topic);
                if !state.exists {
                    return Err(ProjectorError::NoSuchTopic(mutation.topic.clone()));
                }
                state.exists = false;
                table.set(&mutation.topic, state);
                Ok(vec![EventPayload::TopicDestroy])
            }
            MutationPayload::Put { key, value } => {
                if !table.get(&mutation.topic).exists {
                    return Err(ProjectorError::NoSuchTopic(mutation.topic.clone()));
                }
                Ok(vec![EventPayload::KeyPut { key: key.clone(), value: value.clone() }])
            }
            MutationPayload::Delete { key } => {
                if !table.get(&mutation.topic).exists {
                    return Err(ProjectorError::NoSuchTopic(mutation.topic.clone()));
                }
                Ok(vec![EventPayload::KeyDelete { key: key.clone() }])
            }
            MutationPayload::UpdateConfig(_) => {
                // UPDATE_CONFIG never persists topic events; NodeState handles the
                // synthesized CONFIG_CHANGE pseudo-event directly (§4.7).
                Ok(vec![])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClientId;

    fn mutation(payload: MutationPayload) -> Mutation {
        Mutation { term: 1, global_offset: 1, topic: "t".into(), client_id: ClientId(1), client_nonce: 1, payload }
    }

    #[test]
    fn create_then_put_then_destroy() {
        let projector = RawProjector;
        let mut table = TopicTable::new();

        let create = mutation(MutationPayload::CreateTopic { code: vec![], args: vec![] });
        let events = projector.project(&create, &mut table).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EventPayload::TopicCreate { .. }));

        let put = mutation(MutationPayload::Put { key: vec![1], value: vec![2] });
        let events = projector.project(&put, &mut table).unwrap();
        assert!(matches!(events[0], EventPayload::KeyPut { .. }));

        let destroy = mutation(MutationPayload::DestroyTopic);
        let events = projector.project(&destroy, &mut table).unwrap();
        assert!(matches!(events[0], EventPayload::TopicDestroy));
    }

    #[test]
    fn put_without_create_fails() {
        let projector = RawProjector;
        let mut table = TopicTable::new();
        let put = mutation(MutationPayload::Put { key: vec![1], value: vec![2] });
        assert_eq!(projector.project(&put, &mut table), Err(ProjectorError::NoSuchTopic("t".into())));
    }
}
