//! Integration tests for runtimes talking over the in-process local mesh
//!
//! Each test starts real runtimes on a shared `LocalMesh` and drives them only
//! through `RuntimeHandle`, the way a UI would.

use meshchat_core::{MeshConfig, PeerIdentity, SendOutcome};
use meshchat_harness::LocalMesh;
use meshchat_runtime::{RuntimeBuilder, RuntimeHandle};
use tokio::time::{sleep, timeout, Duration};

const WAIT: Duration = Duration::from_secs(5);

async fn start_node(mesh: &LocalMesh, name: &str) -> RuntimeHandle {
    RuntimeBuilder::new(PeerIdentity::new(name))
        .with_config(MeshConfig::testing())
        .build_and_start(mesh.transport())
        .await
        .expect("runtime starts")
}

async fn wait_for_peers(node: &RuntimeHandle, count: usize) {
    node.wait_for(WAIT, |s| s.connected_peer_count() == count)
        .await
        .unwrap_or_else(|e| panic!("{} never saw {count} peers: {e}", node.local()));
}

async fn wait_for_message(node: &RuntimeHandle, line: &str) {
    node.wait_for(WAIT, |s| s.messages.iter().any(|m| m.to_string() == line))
        .await
        .unwrap_or_else(|e| panic!("{} never logged {line:?}: {e}", node.local()));
}

async fn eventually<F: FnMut() -> bool>(mut check: F) {
    timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test]
async fn two_nodes_discover_connect_and_chat() {
    let mesh = LocalMesh::new();
    let mut alice = start_node(&mesh, "alice").await;
    let mut bob = start_node(&mesh, "bob").await;

    wait_for_peers(&alice, 1).await;
    wait_for_peers(&bob, 1).await;
    assert_eq!(alice.snapshot().connected_peers, vec![bob.local().clone()]);

    let outcome = alice.send_text("hello bob").await.unwrap();
    assert_eq!(outcome, SendOutcome::Delivered { recipients: 1 });
    wait_for_message(&bob, "alice: hello bob").await;

    bob.send_text("hi alice").await.unwrap();
    wait_for_message(&alice, "bob: hi alice").await;

    let log: Vec<String> = alice
        .snapshot()
        .messages
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(log, vec!["self: hello bob", "bob: hi alice"]);

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn lone_node_sends_nothing() {
    let mesh = LocalMesh::new();
    let mut alice = start_node(&mesh, "alice").await;

    assert_eq!(alice.send_text("anyone?").await.unwrap(), SendOutcome::NoPeers);
    assert!(alice.snapshot().messages.is_empty());

    alice.shutdown().await.unwrap();
}

#[tokio::test]
async fn broadcast_reaches_every_connected_peer() {
    let mesh = LocalMesh::new();
    let mut nodes = Vec::new();
    for name in ["alice", "bob", "carol"] {
        nodes.push(start_node(&mesh, name).await);
    }
    for node in &nodes {
        wait_for_peers(node, 2).await;
    }

    let outcome = nodes[0].send_text("hi all").await.unwrap();
    assert_eq!(outcome, SendOutcome::Delivered { recipients: 2 });
    wait_for_message(&nodes[1], "alice: hi all").await;
    wait_for_message(&nodes[2], "alice: hi all").await;

    for node in &mut nodes {
        node.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn severed_link_heals_by_reinvitation() {
    let mesh = LocalMesh::new();
    let mut alice = start_node(&mesh, "alice").await;
    let mut bob = start_node(&mesh, "bob").await;
    wait_for_peers(&alice, 1).await;
    wait_for_peers(&bob, 1).await;

    mesh.sever(alice.local(), bob.local());
    assert_eq!(mesh.link_count(), 0);

    eventually(|| mesh.are_linked(alice.local(), bob.local())).await;
    wait_for_peers(&alice, 1).await;
    wait_for_peers(&bob, 1).await;

    alice.send_text("still here").await.unwrap();
    wait_for_message(&bob, "alice: still here").await;

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn reset_reconnects_on_a_fresh_session() {
    let mesh = LocalMesh::new();
    let mut alice = start_node(&mesh, "alice").await;
    let mut bob = start_node(&mesh, "bob").await;
    wait_for_peers(&alice, 1).await;
    let before = alice.snapshot().session;

    let fresh = alice.reset().await.unwrap();
    assert_ne!(Some(fresh), before);

    // Bob sees the old session drop and invites alice into the new one
    alice
        .wait_for(WAIT, |s| s.session == Some(fresh) && s.connected_peer_count() == 1)
        .await
        .unwrap();
    wait_for_peers(&bob, 1).await;

    bob.send_text("welcome back").await.unwrap();
    wait_for_message(&alice, "bob: welcome back").await;

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn peer_leaving_range_stops_reinvites_until_it_returns() {
    let mesh = LocalMesh::new();
    let mut alice = start_node(&mesh, "alice").await;
    let mut bob = start_node(&mesh, "bob").await;
    wait_for_peers(&alice, 1).await;

    mesh.set_in_range(bob.local(), false);
    wait_for_peers(&alice, 0).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(mesh.link_count(), 0);
    assert_eq!(alice.connected_peer_count(), 0);

    mesh.set_in_range(bob.local(), true);
    wait_for_peers(&alice, 1).await;
    wait_for_peers(&bob, 1).await;

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_payload_is_not_logged() {
    let mesh = LocalMesh::new();
    let mut alice = start_node(&mesh, "alice").await;
    let mut bob = start_node(&mesh, "bob").await;
    wait_for_peers(&bob, 1).await;

    mesh.inject_payload(alice.local(), bob.local(), vec![0xc3, 0x28])
        .unwrap();
    mesh.inject_payload(alice.local(), bob.local(), b"valid".to_vec())
        .unwrap();

    wait_for_message(&bob, "alice: valid").await;
    assert_eq!(bob.snapshot().messages.len(), 1);

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}
