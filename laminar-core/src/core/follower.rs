//! The follower's run loop: election-timeout tracking, APPEND_MUTATIONS application (with
//! the term-mismatch rewind rule), and vote granting (§4.1, §4.2, §4.5).

use futures::StreamExt;
use tokio::time::Instant;

use crate::client_gateway::ClientGateway;
use crate::command::Command;
use crate::error::LaminarError;
use crate::ids::{GlobalOffset, NodeId, Term};
use crate::log_store::LogStore;
use crate::peer_gateway::{AppendMutationsRequest, PeerGateway, PeerStateMsg, ReceivedMutationsMsg, RequestVotesRequest};

use super::{NodeState, Role};

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    #[tracing::instrument(level = "debug", skip(self), fields(id = %self.id, term = self.current_term))]
    pub(crate) async fn run_follower(&mut self) -> anyhow::Result<()> {
        self.report_metrics();
        let deadline = Instant::now() + self.election_timeout();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => {
                    self.role = Role::Candidate;
                    return Ok(());
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
                    let reset = self.handle_follower_command(cmd).await?;
                    if reset {
                        sleep.as_mut().reset(Instant::now() + self.election_timeout());
                    }
                }
            }
            if self.stopped || !matches!(self.role, Role::Follower) {
                return Ok(());
            }
        }
    }

    /// Returns `true` if the election timer should be reset (the node heard from a
    /// legitimate current leader, or just cast a vote).
    async fn handle_follower_command(&mut self, cmd: Command) -> anyhow::Result<bool> {
        match cmd {
            Command::ClientRequest(req) => {
                self.handle_client_request(req).await?;
                Ok(false)
            }
            Command::ListenerSubscribe { listener_id, topic, from_local_offset } => {
                self.handle_listener_subscribe(listener_id, topic, from_local_offset).await?;
                Ok(false)
            }
            Command::ListenerUnsubscribe { listener_id } => {
                self.listeners.remove(&listener_id);
                Ok(false)
            }
            Command::PeerIdentity { .. } => Ok(false),
            Command::AppendMutations { from, req } => self.handle_append_mutations(from, req).await,
            Command::RequestVotes { from, req } => self.handle_request_votes_as_follower(from, req).await,
            Command::PeerState { .. } | Command::ReceivedMutations { .. } | Command::Vote { .. } => Ok(false),
            Command::PeerConnected { .. } | Command::PeerDisconnected { .. } => Ok(false),
            Command::LogStoreFailed { reason } => Err(LaminarError::LogStore(reason).into()),
            Command::ElectionTimeout => {
                self.role = Role::Candidate;
                Ok(false)
            }
            Command::HeartbeatTick => Ok(false),
            Command::ChangeConfig { tx, .. } => {
                let _ = tx.send(Err(crate::error::ChangeConfigError::NotLeader));
                Ok(false)
            }
            Command::Stop => {
                self.stopped = true;
                Ok(false)
            }
        }
    }

    /// Apply (or reject, with a NACK) an APPEND_MUTATIONS from the current leader (§4.2,
    /// §4.5).
    async fn handle_append_mutations(&mut self, from: NodeId, req: AppendMutationsRequest) -> anyhow::Result<bool> {
        if req.term < self.current_term {
            let _ = self.peer_gateway.send_peer_state(from, PeerStateMsg { last_received_offset: self.buffer.last_offset() }).await;
            return Ok(false);
        }
        if req.term > self.current_term {
            self.current_term = req.term;
            self.voted_for = None;
            self.save_hard_state().await.map_err(|e| LaminarError::LogStore(e.to_string()))?;
        }
        self.current_leader = Some(from);

        if !self.previous_matches(req.previous_offset, req.previous_term) {
            self.buffer.drop_tail_from(req.previous_offset + 1);
            let _ = self.peer_gateway.send_peer_state(from, PeerStateMsg { last_received_offset: self.buffer.last_offset() }).await;
            return Ok(true);
        }

        if !req.entries.is_empty() && req.previous_offset + (req.entries.len() as u64) < self.buffer.last_offset() {
            // Leader is resending into the middle of what we already buffered (a
            // retransmit covering the same ground); only the tail matters. A heartbeat
            // (empty entries) never carries this information and must not truncate
            // anything past `last_committed_offset` (§4.5).
            self.buffer.drop_tail_from(req.previous_offset + 1);
        }

        for mutation in req.entries {
            if mutation.global_offset != self.buffer.next_offset() {
                continue;
            }
            self.append_replicated_entry(mutation).await?;
        }

        self.advance_commits_to(req.last_committed_offset.min(self.buffer.last_offset())).await;

        let _ = self
            .peer_gateway
            .send_received_mutations(from, ReceivedMutationsMsg { offset_acked: self.buffer.last_offset() })
            .await;
        Ok(true)
    }

    fn previous_matches(&self, previous_offset: GlobalOffset, previous_term: Term) -> bool {
        if previous_offset == self.last_committed_offset {
            return previous_term == self.last_committed_term || previous_offset == 0;
        }
        self.buffer.term_of(previous_offset).map(|t| t == previous_term).unwrap_or(false)
    }

    async fn handle_request_votes_as_follower(&mut self, from: NodeId, req: RequestVotesRequest) -> anyhow::Result<bool> {
        if req.new_term < self.current_term {
            let _ = self.peer_gateway.send_vote(from, crate::peer_gateway::VoteMsg { term: self.current_term, granted: false }).await;
            return Ok(false);
        }
        if req.new_term > self.current_term {
            self.current_term = req.new_term;
            self.voted_for = None;
        }
        let granted = self.voted_for.map(|v| v == from).unwrap_or(true) && req.last_received_offset >= self.buffer.last_offset();
        if granted {
            self.voted_for = Some(from);
        }
        self.save_hard_state().await.map_err(|e| LaminarError::LogStore(e.to_string()))?;
        let _ = self.peer_gateway.send_vote(from, crate::peer_gateway::VoteMsg { term: self.current_term, granted }).await;
        Ok(granted)
    }
}
