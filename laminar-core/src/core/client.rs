//! The client-accepted mutation pipeline (§4.3) and the shared "accept" step both client
//! mutations and admin-driven UPDATE_CONFIG proposals funnel through.

use crate::client_gateway::{ClientGateway, ClientRequest, ClientResponse, MutateRequest};
use crate::error::ClientWriteError;
use crate::ids::{ClientId, GlobalOffset, Nonce};
use crate::inflight::BufferedEntry;
use crate::log_store::LogStore;
use crate::mutation::{Mutation, MutationPayload};
use crate::peer_gateway::PeerGateway;
use crate::topic::TopicState;
use crate::wire::validate_topic_name;

use super::{NodeState, Role};

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    #[tracing::instrument(level = "debug", skip(self, request))]
    pub(crate) async fn handle_client_request(&mut self, request: ClientRequest) -> anyhow::Result<()> {
        match request {
            ClientRequest::Handshake { client_id } => {
                self.client_next_nonce.insert(client_id, 1);
                self.client_gateway.send_to_client(client_id, ClientResponse::ClientReady { next_nonce: 1 }).await?;
            }
            ClientRequest::Reconnect { client_id, last_known_commit_offset, first_resent_nonce } => {
                self.handle_reconnect(client_id, last_known_commit_offset, first_resent_nonce).await?;
            }
            ClientRequest::Mutate { client_id, nonce, request } => {
                self.handle_mutate(client_id, nonce, request).await?;
            }
        }
        Ok(())
    }

    async fn handle_mutate(&mut self, client_id: ClientId, nonce: Nonce, request: MutateRequest) -> anyhow::Result<()> {
        if !matches!(self.role, Role::Leader) {
            self.client_gateway.send_to_client(client_id, ClientResponse::Redirect { leader: self.current_leader }).await?;
            return Ok(());
        }

        let expected = *self.client_next_nonce.entry(client_id).or_insert(1);
        if nonce != expected {
            let err = ClientWriteError::NonceMismatch { expected, got: nonce };
            self.client_gateway.send_to_client(client_id, ClientResponse::Error { reason: err.to_string() }).await?;
            return Ok(());
        }

        if let MutateRequest::UpdateConfig(cfg) = &request {
            if let Err(err) = self.begin_change_config(cfg.clone()).await {
                self.client_gateway.send_to_client(client_id, ClientResponse::Error { reason: err.to_string() }).await?;
                return Ok(());
            }
            self.client_next_nonce.insert(client_id, nonce + 1);
            self.client_gateway
                .send_to_client(client_id, ClientResponse::Received { nonce, last_committed_offset: self.last_committed_offset })
                .await?;
            return Ok(());
        }

        let (topic, payload) = match request {
            MutateRequest::CreateTopic { topic, code, args } => (topic, MutationPayload::CreateTopic { code, args }),
            MutateRequest::DestroyTopic { topic } => (topic, MutationPayload::DestroyTopic),
            MutateRequest::Put { topic, key, value } => (topic, MutationPayload::Put { key, value }),
            MutateRequest::Delete { topic, key } => (topic, MutationPayload::Delete { key }),
            MutateRequest::UpdateConfig(_) => unreachable!("handled above"),
        };

        if let Err(wire_err) = validate_topic_name(&topic) {
            let err = ClientWriteError::InvalidTopic(format!("{topic}: {wire_err}"));
            self.client_gateway.send_to_client(client_id, ClientResponse::Error { reason: err.to_string() }).await?;
            return Ok(());
        }

        let offset = self.accept_mutation(topic, client_id, nonce, payload).await?;
        self.client_next_nonce.insert(client_id, nonce + 1);
        self.replicate_new_entry(offset).await;
        self.advance_commits().await;

        self.client_gateway
            .send_to_client(client_id, ClientResponse::Received { nonce, last_committed_offset: self.last_committed_offset })
            .await?;
        Ok(())
    }

    /// Assign a global offset, run the projector against a speculative topic-state table
    /// derived from the committed table plus every currently-buffered mutation, and append
    /// the result to the in-flight buffer (§4.3 step 4, §9).
    ///
    /// A projector failure does not reject the mutation (§7): it still gets a global
    /// offset and a buffer slot, just with zero events and an error effect recorded on the
    /// [`BufferedEntry`].
    pub(crate) async fn accept_mutation(
        &mut self,
        topic: String,
        client_id: ClientId,
        client_nonce: Nonce,
        payload: MutationPayload,
    ) -> anyhow::Result<GlobalOffset> {
        let global_offset = self.buffer.next_offset();
        let mutation = Mutation { term: self.current_term, global_offset, topic: topic.clone(), client_id, client_nonce, payload };

        let mut table = self.committed_topic_table.clone();
        for buffered in self.buffer.iter() {
            apply_events_to_table(&mut table, &buffered.mutation.topic, &buffered.events);
        }

        let (events, projector_error) = match self.projector.project(&mutation, &mut table) {
            Ok(events) => (events, None),
            Err(err) => (vec![], Some(err.to_string())),
        };

        let previous_term = self.buffer.iter().last().map(|e| e.mutation.term).unwrap_or(self.last_committed_term);
        self.buffer.append(BufferedEntry { mutation, events, previous_term, projector_error });

        self.current_progress.record(self.id, global_offset);
        for progress in self.pending_configs.values_mut() {
            progress.record(self.id, global_offset);
        }
        if let Some(d) = self.downstreams.get_mut(&self.id) {
            d.last_received_offset = global_offset;
        }
        self.report_metrics();
        Ok(global_offset)
    }
}

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    /// Append a mutation whose global offset was already assigned by the leader (§4.2,
    /// §4.5). Runs the same speculative-projector evaluation a leader runs at accept time
    /// so that every replica buffers identical events ahead of commit (§4.7, §9).
    pub(crate) async fn append_replicated_entry(&mut self, mutation: Mutation) -> anyhow::Result<()> {
        debug_assert_eq!(mutation.global_offset, self.buffer.next_offset());

        let mut table = self.committed_topic_table.clone();
        for buffered in self.buffer.iter() {
            apply_events_to_table(&mut table, &buffered.mutation.topic, &buffered.events);
        }

        let (events, projector_error) = match self.projector.project(&mutation, &mut table) {
            Ok(events) => (events, None),
            Err(err) => (vec![], Some(err.to_string())),
        };
        let previous_term = self.buffer.iter().last().map(|e| e.mutation.term).unwrap_or(self.last_committed_term);
        self.buffer.append(BufferedEntry { mutation, events, previous_term, projector_error });
        Ok(())
    }
}

fn apply_events_to_table(table: &mut crate::topic::TopicTable, topic: &str, events: &[crate::event::EventPayload]) {
    use crate::event::EventPayload;
    for event in events {
        match event {
            EventPayload::TopicCreate { .. } => table.set(topic, TopicState { exists: true }),
            EventPayload::TopicDestroy => table.set(topic, TopicState { exists: false }),
            _ => {}
        }
    }
}
