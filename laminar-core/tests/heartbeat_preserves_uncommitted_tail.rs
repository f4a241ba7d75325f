//! §4.5: a heartbeat (an APPEND_MUTATIONS with no entries) must never regress a follower's
//! `last_received_offset`, even though its `previous_offset` always names the leader's
//! *committed* offset rather than the tail the follower has actually buffered.

mod fixtures;

use std::time::Duration;

use laminar_core::command::Command;
use laminar_core::ids::{ClientId, NodeId};
use laminar_core::mutation::{Mutation, MutationPayload};
use laminar_core::peer_gateway::AppendMutationsRequest;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn mutation(offset: u64, term: u64) -> Mutation {
    Mutation { term, global_offset: offset, topic: "orders".into(), client_id: ClientId(1), client_nonce: offset, payload: MutationPayload::Put { key: vec![], value: vec![offset as u8] } }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Command>) -> Command {
    timeout(Duration::from_secs(2), rx.recv()).await.expect("timed out waiting for a reply").expect("leader channel closed")
}

#[tokio::test]
async fn heartbeat_does_not_drop_entries_past_the_commit_point() {
    let network = fixtures::Network::new();
    let (node, _client_gateway, _peer_gateway) = fixtures::spawn_node(NodeId(1), fixtures::entry(1, 9601), network.clone()).await;

    let (leader_tx, mut leader_rx) = mpsc::unbounded_channel();
    network.register(NodeId(2), leader_tx).await;

    // Step down to FOLLOWER of a term-1 leader.
    node.dispatch(Command::AppendMutations {
        from: NodeId(2),
        req: AppendMutationsRequest { term: 1, previous_offset: 0, previous_term: 0, entries: vec![], last_committed_offset: 0 },
    })
    .unwrap();

    // Buffer two entries, neither committed yet (the leader's own commit point stays at 0,
    // as happens whenever a peer acking them hasn't been heard back from yet).
    node.dispatch(Command::AppendMutations {
        from: NodeId(2),
        req: AppendMutationsRequest {
            term: 1,
            previous_offset: 0,
            previous_term: 0,
            entries: vec![mutation(1, 1), mutation(2, 1)],
            last_committed_offset: 0,
        },
    })
    .unwrap();
    match recv(&mut leader_rx).await {
        Command::ReceivedMutations { msg, .. } => assert_eq!(msg.offset_acked, 2),
        other => panic!("expected RECEIVED_MUTATIONS(2), got {other:?}"),
    }

    // A plain heartbeat: no entries, `previous_offset` pinned to the still-uncommitted
    // point at offset 0. This must not touch the buffered tail at all.
    node.dispatch(Command::AppendMutations {
        from: NodeId(2),
        req: AppendMutationsRequest { term: 1, previous_offset: 0, previous_term: 0, entries: vec![], last_committed_offset: 0 },
    })
    .unwrap();
    match recv(&mut leader_rx).await {
        Command::ReceivedMutations { msg, .. } => assert_eq!(msg.offset_acked, 2, "heartbeat regressed the follower's buffered tail"),
        other => panic!("expected RECEIVED_MUTATIONS(2), got {other:?}"),
    }

    node.shutdown().await.unwrap();
}
