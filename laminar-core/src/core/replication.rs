//! The leader's run loop: heartbeats, lock-step single-entry replication, and the command
//! handlers that apply while `role == Leader` (§4.1, §4.5).

use futures::StreamExt;
use tokio::time::interval;

use crate::client_gateway::ClientGateway;
use crate::command::Command;
use crate::ids::{GlobalOffset, NodeId, Term};
use crate::log_store::LogStore;
use crate::peer::DownstreamPeer;
use crate::peer_gateway::{AppendMutationsRequest, PeerGateway, RequestVotesRequest};

use super::{NodeState, Role};

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    #[tracing::instrument(level = "debug", skip(self), fields(id = %self.id, term = self.current_term))]
    pub(crate) async fn run_leader(&mut self) -> anyhow::Result<()> {
        self.current_leader = Some(self.id);
        self.voted_for = Some(self.id);
        self.save_hard_state().await.map_err(|e| crate::error::LaminarError::LogStore(e.to_string()))?;

        for peer in self.current_config.entries.clone() {
            if peer.node_id == self.id {
                continue;
            }
            self.downstreams.entry(peer.node_id).or_insert_with(|| DownstreamPeer::new(peer.node_id, self.last_committed_offset));
            if let Err(err) = self.peer_gateway.connect(peer.node_id, peer).await {
                tracing::warn!(node = %peer.node_id, error = %err, "failed to connect to downstream peer");
            }
        }
        let last_offset = self.buffer.last_offset();
        for d in self.downstreams.values_mut() {
            d.reset_for_new_term(last_offset);
        }
        self.report_metrics();

        let mut heartbeat = interval(self.heartbeat_interval());
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    self.send_heartbeats().await;
                }
                outcome = self.commit_futures.next(), if !self.commit_futures.is_empty() => {
                    if let Some(outcome) = outcome {
                        self.apply_commit_outcome(outcome).await?;
                    }
                }
                cmd = self.rx.recv() => {
                    let cmd = match cmd {
                        Some(c) => c,
                        None => { self.stopped = true; return Ok(()); }
                    };
                    self.handle_leader_command(cmd).await?;
                }
            }
            if self.stopped || !matches!(self.role, Role::Leader) {
                return Ok(());
            }
        }
    }

    async fn handle_leader_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::ClientRequest(req) => self.handle_client_request(req).await?,
            Command::ListenerSubscribe { listener_id, topic, from_local_offset } => {
                self.handle_listener_subscribe(listener_id, topic, from_local_offset).await?;
            }
            Command::ListenerUnsubscribe { listener_id } => {
                self.listeners.remove(&listener_id);
            }
            Command::PeerIdentity { from, .. } => {
                if let Some(d) = self.downstreams.get_mut(&from) {
                    d.connected = true;
                }
                self.try_send_next(from).await;
            }
            Command::AppendMutations { from, req } => {
                // A term merely equal to ours still means another leader exists: every node
                // boots as leader of its own single-member config (§4.1), so two singleton
                // leaders meet at the same term whenever one joins the other's cluster via
                // UPDATE_CONFIG, with no election ever having run to separate them.
                if req.term >= self.current_term {
                    self.step_down_to_follower(req.term);
                    self.save_hard_state().await.map_err(|e| crate::error::LaminarError::LogStore(e.to_string()))?;
                    self.current_leader = Some(from);
                }
            }
            Command::RequestVotes { from, req } => {
                self.handle_request_votes(from, req).await?;
            }
            Command::PeerState { from, msg } => {
                if let Some(d) = self.downstreams.get_mut(&from) {
                    d.next_to_send = msg.last_received_offset + 1;
                    d.writable = true;
                }
                self.try_send_next(from).await;
            }
            Command::ReceivedMutations { from, msg } => {
                self.current_progress.record(from, msg.offset_acked);
                for pending in self.pending_configs.values_mut() {
                    pending.record(from, msg.offset_acked);
                }
                if let Some(d) = self.downstreams.get_mut(&from) {
                    d.last_received_offset = d.last_received_offset.max(msg.offset_acked);
                    d.writable = true;
                }
                self.advance_commits().await;
                self.try_send_next(from).await;
            }
            Command::Vote { .. } => {}
            Command::PeerConnected { from } => {
                if let Some(d) = self.downstreams.get_mut(&from) {
                    d.connected = true;
                }
            }
            Command::PeerDisconnected { from } => {
                if let Some(d) = self.downstreams.get_mut(&from) {
                    d.connected = false;
                    d.writable = false;
                }
            }
            Command::LogStoreFailed { reason } => {
                return Err(crate::error::LaminarError::LogStore(reason).into());
            }
            Command::ElectionTimeout | Command::HeartbeatTick => {}
            Command::ChangeConfig { new_config, tx } => {
                let result = self.begin_change_config(new_config).await;
                let _ = tx.send(result);
            }
            Command::Stop => self.stopped = true,
        }
        Ok(())
    }

    /// Send a HEARTBEAT (or, to a peer still catching up, its next single pending entry)
    /// to every downstream (§4.5).
    async fn send_heartbeats(&mut self) {
        let ids: Vec<NodeId> = self.downstreams.keys().copied().filter(|id| *id != self.id).collect();
        for id in ids {
            let needs_entry = self
                .downstreams
                .get(&id)
                .map(|d| d.writable && d.next_to_send <= self.buffer.last_offset())
                .unwrap_or(false);
            if needs_entry {
                self.try_send_next(id).await;
                continue;
            }
            let req = AppendMutationsRequest {
                term: self.current_term,
                previous_offset: self.last_committed_offset,
                previous_term: self.last_committed_term,
                entries: vec![],
                last_committed_offset: self.last_committed_offset,
            };
            if let Err(err) = self.peer_gateway.send_append_mutations(id, req).await {
                tracing::debug!(node = %id, error = %err, "heartbeat send failed");
            }
        }
    }

    /// Send the single next buffered entry for a newly accepted mutation, to every
    /// downstream currently caught up and writable (§4.5 lock-step line-rate replication).
    pub(crate) async fn replicate_new_entry(&mut self, offset: GlobalOffset) {
        let ids: Vec<NodeId> = self.downstreams.keys().copied().filter(|id| *id != self.id).collect();
        for id in ids {
            let ready = self.downstreams.get(&id).map(|d| d.writable && d.next_to_send == offset).unwrap_or(false);
            if ready {
                self.send_entry_at(id, offset).await;
            }
        }
    }

    async fn try_send_next(&mut self, id: NodeId) {
        let next = match self.downstreams.get(&id) {
            Some(d) if d.writable => d.next_to_send,
            _ => return,
        };
        if next <= self.buffer.last_offset() {
            self.send_entry_at(id, next).await;
        }
    }

    async fn send_entry_at(&mut self, id: NodeId, offset: GlobalOffset) {
        let mutation = match self.buffer.peek(offset) {
            Some(e) => e.mutation.clone(),
            None => return,
        };
        let previous_term = self.term_before(offset);
        let req = AppendMutationsRequest {
            term: self.current_term,
            previous_offset: offset - 1,
            previous_term,
            entries: vec![mutation],
            last_committed_offset: self.last_committed_offset,
        };
        if self.peer_gateway.send_append_mutations(id, req).await.is_ok() {
            if let Some(d) = self.downstreams.get_mut(&id) {
                d.writable = false;
                d.last_sent_offset = offset;
                d.next_to_send = offset + 1;
            }
        }
    }

    /// The term of the entry immediately preceding `offset`, used as the "previous term"
    /// check in APPEND_MUTATIONS (§4.2, §4.5).
    pub(crate) fn term_before(&self, offset: GlobalOffset) -> Term {
        if offset == 0 {
            return 0;
        }
        let previous = offset - 1;
        if previous == self.last_committed_offset {
            self.last_committed_term
        } else {
            self.buffer.term_of(previous).unwrap_or(self.last_committed_term)
        }
    }

    /// Respond to a REQUEST_VOTES while leader: step down if the candidate's term is
    /// higher, otherwise reject (§4.1).
    pub(crate) async fn handle_request_votes(&mut self, from: NodeId, req: RequestVotesRequest) -> anyhow::Result<()> {
        if req.new_term > self.current_term {
            self.step_down_to_follower(req.new_term);
            self.save_hard_state().await.map_err(|e| crate::error::LaminarError::LogStore(e.to_string()))?;
        }
        let granted = req.new_term >= self.current_term
            && self.voted_for.map(|v| v == from).unwrap_or(true)
            && req.last_received_offset >= self.buffer.last_offset();
        if granted {
            self.voted_for = Some(from);
            self.save_hard_state().await.map_err(|e| crate::error::LaminarError::LogStore(e.to_string()))?;
        }
        let _ = self.peer_gateway.send_vote(from, crate::peer_gateway::VoteMsg { term: self.current_term, granted }).await;
        Ok(())
    }
}
