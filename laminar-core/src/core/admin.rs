//! UPDATE_CONFIG admission and joint consensus (§4.3, §4.4).
//!
//! A config change is just another mutation, but its commit safety rule is stronger: the
//! mutation that carries it, and everything after it, may only commit once a majority of
//! *both* the outgoing and the incoming membership have received it. We model that the
//! same way [`crate::peer::PendingConfigMap`] is documented to: a second [`SyncProgress`]
//! tracking the incoming membership becomes active alongside `current_progress` for as
//! long as the change is in flight, and the commit offset that matters is the minimum
//! progress across all of them (`commit.rs`).

use crate::client_gateway::ClientGateway;
use crate::cluster_config::ClusterConfig;
use crate::error::ChangeConfigError;
use crate::ids::ClientId;
use crate::log_store::LogStore;
use crate::mutation::MutationPayload;
use crate::peer::{DownstreamPeer, SyncProgress};
use crate::peer_gateway::PeerGateway;

use super::{NodeState, Role};

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    /// Propose `new_config` as the cluster's next membership (§4.3, §4.4). Rejects if this
    /// node is not the leader, if a config change is already in flight, or if the proposed
    /// size is out of bounds.
    #[tracing::instrument(level = "debug", skip(self, new_config))]
    pub(crate) async fn begin_change_config(&mut self, new_config: ClusterConfig) -> Result<(), ChangeConfigError> {
        if !matches!(self.role, Role::Leader) {
            return Err(ChangeConfigError::NotLeader);
        }
        if !self.pending_configs.is_empty() {
            return Err(ChangeConfigError::AlreadyInJointConsensus);
        }
        if new_config.entries.len() < crate::cluster_config::MIN_CONFIG_ENTRIES
            || new_config.entries.len() > crate::cluster_config::MAX_CONFIG_ENTRIES
        {
            return Err(ChangeConfigError::InvalidSize(new_config.entries.len()));
        }

        let offset = self
            .accept_mutation(
                crate::mutation::CONFIG_TOPIC.to_string(),
                ClientId(0),
                0,
                MutationPayload::UpdateConfig(new_config.clone()),
            )
            .await
            .map_err(|_| ChangeConfigError::NotLeader)?;

        let mut progress = SyncProgress::new(new_config.node_ids());
        for id in new_config.node_ids() {
            let known = self.downstreams.get(&id).map(|d| d.last_received_offset).unwrap_or(0);
            progress.record(id, known);
        }
        self.pending_configs.insert(offset, progress);
        self.pending_config_payloads.insert(offset, new_config.clone());

        for entry in &new_config.entries {
            self.downstreams.entry(entry.node_id).or_insert_with(|| DownstreamPeer::new(entry.node_id, self.last_committed_offset));
        }

        self.replicate_new_entry(offset).await;
        self.advance_commits().await;
        Ok(())
    }

    /// Install `new_config` as `current_config` once its joint `SyncProgress` has committed
    /// (§4.4), and drop the logical connection to any peer no longer referenced by any
    /// active config (§4.9).
    #[tracing::instrument(level = "debug", skip(self, new_config, new_progress))]
    pub(crate) async fn install_committed_config(&mut self, new_config: ClusterConfig, new_progress: SyncProgress) {
        let old_members = self.current_config.node_ids();
        let new_members = new_config.node_ids();

        self.current_config = new_config;
        self.current_progress = new_progress;

        for id in old_members.difference(&new_members) {
            self.downstreams.remove(id);
            if let Err(err) = self.peer_gateway.disconnect(*id).await {
                tracing::warn!(node = %id, error = %err, "failed to disconnect stale peer");
            }
        }
    }
}
