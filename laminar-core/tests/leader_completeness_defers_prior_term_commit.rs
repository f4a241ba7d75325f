//! §8 scenario 4: a node that wins an election while still holding an uncommitted entry
//! from an earlier term must not commit that entry on replica-count alone. It has to wait
//! until something it appended in its own current term also reaches the same majority —
//! at which point both commit together.

mod fixtures;

use std::time::Duration;

use laminar_core::client_gateway::{ClientRequest, ClientResponse, MutateRequest};
use laminar_core::cluster_config::{ClusterConfig, ConfigEntry};
use laminar_core::command::Command;
use laminar_core::ids::{ClientId, NodeId};
use laminar_core::peer_gateway::{AppendMutationsRequest, ReceivedMutationsMsg, VoteMsg};
use laminar_core::Role;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn recv_append(rx: &mut mpsc::UnboundedReceiver<Command>) -> AppendMutationsRequest {
    loop {
        match timeout(Duration::from_secs(2), rx.recv()).await.expect("timed out waiting for a peer send").expect("channel closed") {
            Command::AppendMutations { req, .. } if !req.entries.is_empty() => return req,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn prior_term_entry_only_commits_alongside_a_current_term_one() {
    let network = fixtures::Network::new();
    let (node, client_gateway, _peer_gateway) = fixtures::spawn_node(NodeId(1), fixtures::entry(1, 9501), network.clone()).await;

    let (b, c) = (NodeId(2), NodeId(3));
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    network.register(b, b_tx).await;
    let (c_tx, _c_rx) = mpsc::unbounded_channel();
    network.register(c, c_tx).await;

    let client_id = ClientId(1);
    node.submit_client_request(ClientRequest::Handshake { client_id }).unwrap();

    let grow = |entries: Vec<ConfigEntry>, nonce: u64| ClientRequest::Mutate { client_id, nonce, request: MutateRequest::UpdateConfig(ClusterConfig { entries }) };

    // Grow to {A,B,C}, with B acking each config step by hand so the growth itself commits;
    // C never has to, since A+B already majority a 3-member config.
    node.submit_client_request(grow(vec![fixtures::entry(1, 9501), fixtures::entry(2, 9503)], 1)).unwrap();
    let req = recv_append(&mut b_rx).await;
    network.send(b, Command::ReceivedMutations { from: b, msg: ReceivedMutationsMsg { offset_acked: req.previous_offset + req.entries.len() as u64 } }).await.unwrap();
    node.wait(Duration::from_secs(5)).committed(1, "grow to {A,B}").await.unwrap();

    node.submit_client_request(grow(vec![fixtures::entry(1, 9501), fixtures::entry(2, 9503), fixtures::entry(3, 9505)], 2)).unwrap();
    let req = recv_append(&mut b_rx).await;
    network.send(b, Command::ReceivedMutations { from: b, msg: ReceivedMutationsMsg { offset_acked: req.previous_offset + req.entries.len() as u64 } }).await.unwrap();
    node.wait(Duration::from_secs(5)).committed(2, "grow to {A,B,C}").await.unwrap();

    // One more mutation lands in the current (about to become stale) term, offset 3. B
    // receives it but this time we deliberately withhold the ack, so it never reaches
    // majority under the old leader.
    node.submit_client_request(ClientRequest::Mutate {
        client_id,
        nonce: 3,
        request: MutateRequest::Put { topic: "t".into(), key: vec![1], value: vec![1] },
    })
    .unwrap();
    let stale = recv_append(&mut b_rx).await;
    assert_eq!(stale.previous_offset + stale.entries.len() as u64, 3);

    // A higher-term leader appears; A steps down to Follower without touching its buffer.
    node.dispatch(Command::AppendMutations {
        from: NodeId(9),
        req: AppendMutationsRequest { term: 1, previous_offset: 0, previous_term: 0, entries: vec![], last_committed_offset: 0 },
    })
    .unwrap();

    // That phantom leader is never heard from again; A's election timer fires and it runs
    // for office itself, at term 2.
    node.dispatch(Command::ElectionTimeout).unwrap();
    node.dispatch(Command::Vote { from: b, msg: VoteMsg { term: 2, granted: true } }).unwrap();
    node.wait(Duration::from_secs(2)).role(Role::Leader, "A wins the election").await.unwrap();

    // B now reports it already had the old entry (offset 3, term 1) all along — the
    // heartbeat-ack path a real follower would take. Replica count alone now says a
    // majority has offset 3, but it was never replicated by *this* leader's term.
    node.dispatch(Command::ReceivedMutations { from: b, msg: ReceivedMutationsMsg { offset_acked: 3 } }).unwrap();
    let blocked = node.wait(Duration::from_millis(300)).committed(3, "must not commit on stale-term replica count alone").await;
    assert!(blocked.is_err(), "offset 3 (term 1) committed without a current-term entry ever reaching majority");
    assert!(
        client_gateway.responses(client_id).await.iter().all(|r| !matches!(r, ClientResponse::Committed { nonce: 3, .. })),
        "client must not have been told offset 3 committed yet"
    );

    // A accepts a mutation of its own, at its own (current) term — offset 4, term 2 — and
    // replicates it to B.
    node.submit_client_request(ClientRequest::Mutate {
        client_id,
        nonce: 4,
        request: MutateRequest::Put { topic: "t".into(), key: vec![2], value: vec![2] },
    })
    .unwrap();
    let fresh = recv_append(&mut b_rx).await;
    assert_eq!(fresh.term, 2);
    assert_eq!(fresh.previous_offset + fresh.entries.len() as u64, 4);

    // Still must not commit offset 3 purely because of it: nothing at the current term
    // has reached majority yet.
    let still_blocked = node.wait(Duration::from_millis(300)).committed(3, "still no current-term majority").await;
    assert!(still_blocked.is_err(), "offset 3 committed before any current-term entry reached majority");

    // Only once B acks the *current-term* entry does anything commit — and when it does,
    // both the stale entry and the fresh one land together.
    node.dispatch(Command::ReceivedMutations { from: b, msg: ReceivedMutationsMsg { offset_acked: 4 } }).unwrap();
    node.wait(Duration::from_secs(2)).committed(4, "both offsets commit together").await.unwrap();

    let responses = client_gateway.responses(client_id).await;
    assert!(responses.iter().any(|r| matches!(r, ClientResponse::Committed { nonce: 3, .. })), "offset 3 should have committed alongside offset 4");
    assert!(responses.iter().any(|r| matches!(r, ClientResponse::Committed { nonce: 4, .. })), "offset 4 should have committed");

    node.shutdown().await.unwrap();
}
