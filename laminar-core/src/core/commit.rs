//! Commit-prefix computation and the commit pipeline (§4.4, §4.7, §5).
//!
//! Local offsets are assigned here, at commit time, never at accept time (§9): this keeps
//! a topic's local offsets dense even when the in-flight tail that produced them later
//! gets dropped by a term-mismatch rewind (§4.2). The actual disk write is handed to a
//! [`futures::stream::FuturesOrdered`] so a slow commit never blocks the command loop, but
//! completions are still reported to clients in the order they were submitted (§4.4).

use futures::future::FutureExt;

use crate::client_gateway::{ClientGateway, ClientResponse};
use crate::error::LaminarError;
use crate::event::{Event, EventPayload};
use crate::ids::GlobalOffset;
use crate::log_store::LogStore;
use crate::mutation::MutationPayload;
use crate::peer_gateway::PeerGateway;
use crate::topic::TopicState;

use super::{CommitOutcome, NodeState};

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    /// The offset a strict majority of every currently active config (the current config,
    /// plus any config in joint consensus) has acknowledged (§4.4, §9).
    pub(crate) fn consensus_offset(&self) -> GlobalOffset {
        let mut offset = self.current_progress.progress();
        for pending in self.pending_configs.values() {
            offset = offset.min(pending.progress());
        }
        offset
    }

    /// Pop every buffered entry up to the current consensus offset, assign it a local
    /// offset, and spawn its durable commit (§4.4, §4.7, §5). Leader-only: the commit
    /// frontier here is this node's own view of majority acknowledgement.
    ///
    /// Leader completeness (§8 scenario 4): a majority may already have an older-term entry
    /// buffered from a leader that never got to commit it. Counting replicas alone is not
    /// enough to know that entry is actually safe, so nothing commits — not even entries
    /// already safely committable on their own — until this leader has itself gotten an
    /// entry from its own current term to the same majority. Once that happens both commit
    /// in the same pass, via the Log Matching property.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) async fn advance_commits(&mut self) {
        let target = self.consensus_offset();
        if target > self.last_committed_offset
            && !self.buffer.iter().any(|e| e.mutation.term == self.current_term && e.mutation.global_offset <= target)
        {
            return;
        }
        self.advance_commits_to(target).await;
    }

    /// Commit every buffered entry up to `target`. Used directly by followers, who trust
    /// the leader's advertised `last_committed_offset` rather than computing their own
    /// majority (§4.5).
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) async fn advance_commits_to(&mut self, target: GlobalOffset) {
        while self.last_committed_offset < target {
            let offset = self.last_committed_offset + 1;
            let entry = match self.buffer.pop_committed() {
                Some(e) if e.mutation.global_offset == offset => e,
                Some(e) => {
                    // Should not happen: the buffer is dense from last_committed_offset+1.
                    tracing::error!(expected = offset, got = e.mutation.global_offset, "buffer gap at commit time");
                    break;
                }
                None => break,
            };

            let is_config_change = matches!(entry.mutation.payload, MutationPayload::UpdateConfig(_));
            let events: Vec<Event> = if is_config_change {
                vec![]
            } else {
                let base = *self.topic_local_offsets.entry(entry.mutation.topic.clone()).or_insert(0);
                let mut next = base;
                let built: Vec<Event> = entry
                    .events
                    .iter()
                    .map(|payload| {
                        next += 1;
                        Event {
                            term: entry.mutation.term,
                            global_offset: entry.mutation.global_offset,
                            local_offset: next,
                            topic: entry.mutation.topic.clone(),
                            client_id: entry.mutation.client_id,
                            client_nonce: entry.mutation.client_nonce,
                            payload: payload.clone(),
                        }
                    })
                    .collect();
                self.topic_local_offsets.insert(entry.mutation.topic.clone(), next);
                built
            };

            if entry.projector_error.is_none() {
                for event in &events {
                    apply_event_to_committed_table(&mut self.committed_topic_table, event);
                }
            }

            self.last_committed_offset = offset;
            self.last_committed_term = entry.mutation.term;

            let installs_config = if let MutationPayload::UpdateConfig(cfg) = &entry.mutation.payload {
                if let (Some(new_progress), Some(new_config)) =
                    (self.pending_configs.remove(offset), self.pending_config_payloads.remove(&offset))
                {
                    self.install_committed_config(new_config, new_progress).await;
                }
                Some(cfg.clone())
            } else {
                None
            };

            let log_store = self.log_store.clone();
            let mutation = entry.mutation.clone();
            let topic = mutation.topic.clone();
            let client_id = mutation.client_id;
            let client_nonce = mutation.client_nonce;
            let term = mutation.term;
            let projector_error = entry.projector_error.clone();
            let events_to_write = events.clone();

            let fut = async move {
                let result = log_store.commit(mutation, events_to_write).await;
                CommitOutcome { offset, term, topic, client_id, client_nonce, installs_config, projector_error, result: result.map(|_| events) }
            }
            .boxed();
            self.commit_futures.push(fut);

            self.report_metrics();
        }
    }

    /// Drain exactly one completed commit, in submission order, applying its client-facing
    /// and listener-facing side effects (§4.3, §4.4, §4.8).
    #[tracing::instrument(level = "debug", skip(self, outcome))]
    pub(crate) async fn apply_commit_outcome(&mut self, outcome: CommitOutcome) -> anyhow::Result<()> {
        let events = outcome.result.map_err(|err| LaminarError::LogStore(err.to_string()))?;

        self.client_gateway
            .send_to_client(
                outcome.client_id,
                ClientResponse::Committed { nonce: outcome.client_nonce, global_offset: outcome.offset, error: outcome.projector_error },
            )
            .await?;

        for event in events {
            let deliveries: Vec<_> = self
                .listeners
                .iter()
                .filter(|(_, sub)| sub.topic == outcome.topic && sub.next_local_offset == event.local_offset)
                .map(|(id, _)| *id)
                .collect();
            for listener_id in deliveries {
                self.client_gateway.send_to_listener(listener_id, event.clone()).await?;
                if let Some(sub) = self.listeners.get_mut(&listener_id) {
                    sub.next_local_offset += 1;
                }
            }
        }

        if let Some(cfg) = outcome.installs_config {
            let change_event = Event::config_change(outcome.term, cfg);
            self.client_gateway.broadcast_config_change(change_event).await?;
        }

        Ok(())
    }
}

fn apply_event_to_committed_table(table: &mut crate::topic::TopicTable, event: &Event) {
    match &event.payload {
        EventPayload::TopicCreate { .. } => table.set(&event.topic, TopicState { exists: true }),
        EventPayload::TopicDestroy => table.set(&event.topic, TopicState { exists: false }),
        _ => {}
    }
}
