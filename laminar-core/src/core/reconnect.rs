//! Client reconnect replay (§4.6): resend whatever commit acknowledgements a client may
//! have missed while disconnected, then let it resume submitting at a known-good nonce.
//!
//! Unlike the rest of the replication machinery, this has no direct analogue in the
//! teacher; it is grounded instead on the Log Store's random-fetch contract
//! ([`crate::log_store::LogStore::fetch_mutations`]), the same primitive the lagging-peer
//! catch-up path uses.

use crate::client_gateway::{ClientGateway, ClientResponse};
use crate::ids::{ClientId, GlobalOffset, Nonce};
use crate::log_store::LogStore;
use crate::peer_gateway::PeerGateway;

use super::NodeState;

impl<C, P, L> NodeState<C, P, L>
where
    C: ClientGateway,
    P: PeerGateway,
    L: LogStore,
{
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) async fn handle_reconnect(
        &mut self,
        client_id: ClientId,
        last_known_commit_offset: GlobalOffset,
        first_resent_nonce: Nonce,
    ) -> anyhow::Result<()> {
        let mut highest_replayed_nonce: Option<Nonce> = None;
        if last_known_commit_offset < self.last_committed_offset {
            let mutations = self.log_store.fetch_mutations(last_known_commit_offset + 1, self.last_committed_offset + 1).await?;
            for mutation in mutations {
                if mutation.client_id != client_id {
                    continue;
                }
                self.client_gateway
                    .send_to_client(client_id, ClientResponse::Received { nonce: mutation.client_nonce, last_committed_offset: self.last_committed_offset })
                    .await?;
                self.client_gateway
                    .send_to_client(
                        client_id,
                        ClientResponse::Committed { nonce: mutation.client_nonce, global_offset: mutation.global_offset, error: None },
                    )
                    .await?;
                highest_replayed_nonce = Some(mutation.client_nonce);
            }
        }

        let next_nonce = highest_replayed_nonce.map(|n| n + 1).unwrap_or(first_resent_nonce);
        self.client_next_nonce.insert(client_id, next_nonce);
        self.client_gateway.send_to_client(client_id, ClientResponse::ClientReady { next_nonce }).await?;
        Ok(())
    }
}
