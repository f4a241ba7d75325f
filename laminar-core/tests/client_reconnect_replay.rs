//! §8 scenario 5: a client that disconnects after seeing only the first of several commit
//! acknowledgements gets the rest replayed on RECONNECT as a synthetic RECEIVED followed by
//! a synthetic COMMITTED for each missed mutation, then a CLIENT_READY naming one past the
//! highest nonce it was just told about.

mod fixtures;

use std::time::{Duration, Instant};

use laminar_core::client_gateway::{ClientRequest, ClientResponse, MutateRequest};
use laminar_core::ids::{ClientId, NodeId};

/// Poll the client gateway's recorded responses until `pred` matches one, or panic on timeout.
/// `apply_commit_outcome` delivers `Committed` asynchronously once its log-store write
/// finishes, after the watched `NodeMetrics.last_committed_offset` has already advanced — so
/// tests that need the actual client-facing delivery, not just the commit accounting, poll
/// for it directly rather than trusting `Node::wait`.
async fn wait_for(client_gateway: &fixtures::TestClientGateway, client_id: ClientId, pred: impl Fn(&ClientResponse) -> bool) -> Vec<ClientResponse> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let responses = client_gateway.responses(client_id).await;
        if responses.iter().any(&pred) {
            return responses;
        }
        assert!(Instant::now() < deadline, "timed out waiting for expected client response");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn reconnect_replays_missed_commits_then_signals_ready() {
    let network = fixtures::Network::new();
    let (node, client_gateway, _peer_gateway) = fixtures::spawn_node(NodeId(1), fixtures::entry(1, 9301), network).await;

    let client_id = ClientId(1);
    node.submit_client_request(ClientRequest::Handshake { client_id }).unwrap();
    node.submit_client_request(ClientRequest::Mutate {
        client_id,
        nonce: 1,
        request: MutateRequest::CreateTopic { topic: "t".into(), code: vec![], args: vec![] },
    })
    .unwrap();
    node.submit_client_request(ClientRequest::Mutate { client_id, nonce: 2, request: MutateRequest::Put { topic: "t".into(), key: vec![1], value: vec![2] } })
        .unwrap();
    node.submit_client_request(ClientRequest::Mutate { client_id, nonce: 3, request: MutateRequest::Put { topic: "t".into(), key: vec![3], value: vec![4] } })
        .unwrap();
    node.wait(Duration::from_secs(2)).committed(3, "all three mutations commit").await.unwrap();
    let before_reconnect = wait_for(&client_gateway, client_id, |r| matches!(r, ClientResponse::Committed { nonce: 3, .. })).await.len();

    // The client only ever saw the ack for nonce 1 before dropping its connection; it
    // reconnects believing offset 1 is the newest thing committed and that 2 is its next nonce.
    node.submit_client_request(ClientRequest::Reconnect { client_id, last_known_commit_offset: 1, first_resent_nonce: 2 }).unwrap();

    let responses = wait_for(&client_gateway, client_id, |r| matches!(r, ClientResponse::ClientReady { next_nonce: 4 })).await;
    let replayed = &responses[before_reconnect..];

    assert!(matches!(replayed[0], ClientResponse::Received { nonce: 2, .. }), "expected replayed RECEIVED(2) first, got {:?}", replayed[0]);
    assert!(matches!(replayed[1], ClientResponse::Committed { nonce: 2, error: None, .. }), "expected replayed COMMITTED(2) second, got {:?}", replayed[1]);
    assert!(matches!(replayed[2], ClientResponse::Received { nonce: 3, .. }), "expected replayed RECEIVED(3) third, got {:?}", replayed[2]);
    assert!(matches!(replayed[3], ClientResponse::Committed { nonce: 3, error: None, .. }), "expected replayed COMMITTED(3) fourth, got {:?}", replayed[3]);
    assert!(matches!(replayed[4], ClientResponse::ClientReady { next_nonce: 4 }), "expected CLIENT_READY(4) last, got {:?}", replayed[4]);
    assert_eq!(replayed.len(), 5, "nonce 1 must not be replayed: the client already knows about it");

    node.shutdown().await.unwrap();
}
