//! §8 scenario 6: once an UPDATE_CONFIG that drops a member commits, the dropped member's
//! peer connection is torn down while every member of the new config is left untouched.

mod fixtures;

use std::time::Duration;

use laminar_core::client_gateway::{ClientRequest, MutateRequest};
use laminar_core::cluster_config::{ClusterConfig, ConfigEntry};
use laminar_core::command::Command;
use laminar_core::ids::{ClientId, NodeId};
use laminar_core::peer_gateway::ReceivedMutationsMsg;
use tokio::sync::mpsc;

#[tokio::test]
async fn dropped_member_is_disconnected_new_member_is_not() {
    let network = fixtures::Network::new();
    let (node_a, _client_gateway, _peer_gateway_a) = fixtures::spawn_node(NodeId(1), fixtures::entry(1, 9401), network.clone()).await;

    let (b, c, d) = (NodeId(2), NodeId(3), NodeId(4));

    // A alone can't reach a majority once the config grows past one member, so B acks every
    // AppendMutations it sees; C and D never need to, since A+B already majority every config
    // this test proposes.
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    network.register(b, b_tx).await;
    tokio::spawn({
        let network = network.clone();
        async move {
            while let Some(cmd) = b_rx.recv().await {
                if let Command::AppendMutations { from, req } = cmd {
                    let offset_acked = req.previous_offset + req.entries.len() as u64;
                    let _ = network.send(from, Command::ReceivedMutations { from: b, msg: ReceivedMutationsMsg { offset_acked } }).await;
                }
            }
        }
    });

    let (c_tx, mut c_rx) = mpsc::unbounded_channel();
    network.register(c, c_tx).await;
    let (d_tx, mut d_rx) = mpsc::unbounded_channel();
    network.register(d, d_tx).await;

    let client_id = ClientId(1);
    node_a.submit_client_request(ClientRequest::Handshake { client_id }).unwrap();

    let grow = |entries: Vec<ConfigEntry>, nonce: u64| ClientRequest::Mutate { client_id, nonce, request: MutateRequest::UpdateConfig(ClusterConfig { entries }) };

    node_a.submit_client_request(grow(vec![fixtures::entry(1, 9401), fixtures::entry(2, 9403)], 1)).unwrap();
    node_a.wait(Duration::from_secs(5)).committed(1, "grow to {A,B}").await.unwrap();

    node_a.submit_client_request(grow(vec![fixtures::entry(1, 9401), fixtures::entry(2, 9403), fixtures::entry(3, 9405)], 2)).unwrap();
    node_a.wait(Duration::from_secs(5)).committed(2, "grow to {A,B,C}").await.unwrap();

    node_a.submit_client_request(grow(vec![fixtures::entry(1, 9401), fixtures::entry(2, 9403), fixtures::entry(4, 9409)], 3)).unwrap();
    let metrics = node_a.wait(Duration::from_secs(5)).committed(3, "swap C for D").await.unwrap();
    assert_eq!(metrics.members, vec![NodeId(1), NodeId(2), NodeId(4)]);

    // C keeps receiving ordinary replication traffic right up until the swap commits; drain
    // until the disconnect shows up (or time out if it never does).
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match c_rx.recv().await {
                Some(Command::PeerDisconnected { from }) => return from,
                Some(_) => continue,
                None => panic!("C's channel closed before a disconnect arrived"),
            }
        }
    })
    .await
    .expect("timed out waiting for C's disconnect");
    assert_eq!(found, NodeId(1));

    // Give any errant disconnect to D a moment to arrive, then confirm none did among
    // whatever D did receive (heartbeats, replicated entries, ...).
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(cmd) = d_rx.try_recv() {
        assert!(!matches!(cmd, Command::PeerDisconnected { .. }), "D should never be disconnected");
    }

    node_a.shutdown().await.unwrap();
}
