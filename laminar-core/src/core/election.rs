//! The candidate's run loop: starts an election, collects votes, and becomes leader once a
//! majority of every currently active config (current, plus any in joint consensus) has
//! granted (§4.1, §4.5).

use futures::StreamExt;
use tokio::time::Instant;

use crate::client_gateway::ClientGateway;
use crate::command::Command;
use crate::error::LaminarError;
use crate::log_store::LogStore;
use crate::peer_gateway::{PeerGateway, RequestVotesRequest, VoteMsg};

use super::{NodeState, Role};

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    #[tracing::instrument(level = "debug", skip(self), fields(id = %self.id))]
    pub(crate) async fn run_candidate(&mut self) -> anyhow::Result<()> {
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.current_leader = None;
        self.votes_granted.clear();
        self.votes_granted.insert(self.id);
        self.save_hard_state().await.map_err(|e| LaminarError::LogStore(e.to_string()))?;
        self.report_metrics();

        let req = RequestVotesRequest { new_term: self.current_term, last_received_term: self.buffer_term(), last_received_offset: self.buffer.last_offset() };
        for id in self.all_active_members() {
            if id == self.id {
                continue;
            }
            let _ = self.peer_gateway.send_request_votes(id, req).await;
        }

        if self.has_majority_of_every_active_config() {
            self.role = Role::Leader;
            return Ok(());
        }

        let deadline = Instant::now() + self.election_timeout();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => {
                    // Election timed out with no majority; stay a candidate and retry with
                    // a new term on the next dispatch loop iteration (§4.1).
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
                    self.handle_candidate_command(cmd).await?;
                }
            }
            if self.stopped || !matches!(self.role, Role::Candidate) {
                return Ok(());
            }
        }
    }

    async fn handle_candidate_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::ClientRequest(req) => self.handle_client_request(req).await?,
            Command::ListenerSubscribe { listener_id, topic, from_local_offset } => {
                self.handle_listener_subscribe(listener_id, topic, from_local_offset).await?;
            }
            Command::ListenerUnsubscribe { listener_id } => {
                self.listeners.remove(&listener_id);
            }
            Command::PeerIdentity { .. } => {}
            Command::AppendMutations { from, req } => {
                if req.term >= self.current_term {
                    self.step_down_to_follower(req.term);
                    self.current_leader = Some(from);
                    self.save_hard_state().await.map_err(|e| LaminarError::LogStore(e.to_string()))?;
                }
            }
            Command::RequestVotes { from, req } => {
                if req.new_term > self.current_term {
                    self.step_down_to_follower(req.new_term);
                    self.voted_for = Some(from);
                    self.save_hard_state().await.map_err(|e| LaminarError::LogStore(e.to_string()))?;
                }
                let granted = matches!(self.role, Role::Follower) && self.voted_for == Some(from);
                let _ = self.peer_gateway.send_vote(from, VoteMsg { term: self.current_term, granted }).await;
            }
            Command::Vote { from, msg } => {
                if msg.term > self.current_term {
                    self.step_down_to_follower(msg.term);
                    self.save_hard_state().await.map_err(|e| LaminarError::LogStore(e.to_string()))?;
                } else if msg.term == self.current_term && msg.granted {
                    self.votes_granted.insert(from);
                    if self.has_majority_of_every_active_config() {
                        self.role = Role::Leader;
                    }
                }
            }
            Command::PeerState { .. } | Command::ReceivedMutations { .. } => {}
            Command::PeerConnected { .. } | Command::PeerDisconnected { .. } => {}
            Command::LogStoreFailed { reason } => return Err(LaminarError::LogStore(reason).into()),
            Command::ElectionTimeout => {}
            Command::HeartbeatTick => {}
            Command::ChangeConfig { tx, .. } => {
                let _ = tx.send(Err(crate::error::ChangeConfigError::NotLeader));
            }
            Command::Stop => self.stopped = true,
        }
        Ok(())
    }

    fn buffer_term(&self) -> u64 {
        self.buffer.iter().last().map(|e| e.mutation.term).unwrap_or(self.last_committed_term)
    }

    fn all_active_members(&self) -> std::collections::BTreeSet<crate::ids::NodeId> {
        let mut members = self.current_config.node_ids();
        for cfg in self.pending_config_payloads.values() {
            members.extend(cfg.node_ids());
        }
        members
    }

    fn has_majority_of_every_active_config(&self) -> bool {
        let current_ok = count_votes(&self.votes_granted, &self.current_config.node_ids()) >= self.current_config.majority_size();
        let pending_ok = self.pending_config_payloads.values().all(|cfg| {
            count_votes(&self.votes_granted, &cfg.node_ids()) >= cfg.majority_size()
        });
        current_ok && pending_ok
    }
}

fn count_votes(granted: &std::collections::BTreeSet<crate::ids::NodeId>, members: &std::collections::BTreeSet<crate::ids::NodeId>) -> usize {
    granted.intersection(members).count()
}
