//! Topology maintenance over many ticks.
//!
//! Verifies:
//! - A small mesh bootstrapped through one signal converges to a full mesh
//!   of WebRTC links between the peers
//! - Graduated peers let go of the signal while the router keeps it
//! - Links that stay silent past the expiry window are closed on both ends
//! - A transport close drops the peer and cancels its pending timers
//! - Peer churn is published as peers come and go

use mitosis_core::{Address, MeshConfig, RoleType};
use mitosis_mesh::{ChurnType, ConnectionEvent, ConnectionEventKind, ConnectionState};
use mitosis_tests::helpers::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const JOINERS: [&str; 4] = ["n1", "n2", "n3", "n4"];

fn bootstrapped(rounds: usize) -> Mesh {
    let mut mesh = Mesh::with_signal(MeshConfig::default());
    for id in JOINERS {
        mesh.join(id);
    }
    mesh.run_ticks(rounds);
    mesh
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

fn others(me: &str) -> Vec<String> {
    JOINERS
        .iter()
        .filter(|id| **id != me)
        .map(|id| id.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

#[test]
fn joiners_first_reach_the_router() {
    let mesh = bootstrapped(1);
    for id in ["n2", "n3", "n4"] {
        assert_eq!(
            connection_state(mesh.node(id), &rtc("n1")),
            Some(ConnectionState::Open),
            "{id}"
        );
    }
}

#[test]
fn small_mesh_converges_to_full_mesh() {
    let mesh = bootstrapped(12);

    for id in JOINERS {
        let node = mesh.node(id);
        assert!(!node.has_role(RoleType::Newbie), "{id} still a newbie");
        for other in others(id) {
            assert_eq!(
                connection_state(node, &rtc(&other)),
                Some(ConnectionState::Open),
                "{id} -> {other}"
            );
        }
    }
}

#[test]
fn graduated_peers_release_the_signal() {
    let mesh = bootstrapped(12);

    for id in ["n2", "n3", "n4"] {
        let direct = sorted(direct_peers(mesh.node(id)));
        assert_eq!(direct, others(id), "{id}");
    }
    // Routers serve every peer, the signal included.
    assert!(direct_peers(mesh.node("n1")).contains(&SIGNAL.to_string()));
    assert_eq!(
        sorted(direct_peers(mesh.node(SIGNAL))),
        vec!["n1".to_string()]
    );
}

#[test]
fn converged_peers_reach_each_other_without_the_signal() {
    let mut mesh = bootstrapped(12);
    let mut at_n4 = mesh.node_mut("n4").observe_app_content();
    mesh.node_mut("n2")
        .send_app_content("n4", serde_json::json!({"hello": "n4"}))
        .unwrap();
    mesh.pump();

    let message = at_n4.try_recv().unwrap();
    assert_eq!(message.sender().peer_id(), "n2");
}

// ---------------------------------------------------------------------------
// Link lifetime
// ---------------------------------------------------------------------------

#[test]
fn silent_links_expire_on_both_ends() {
    let mut mesh = Mesh::new();
    mesh.add_node("a", &[RoleType::Peer]);
    mesh.add_node("q", &[RoleType::Peer]);
    mesh.node_mut("a").connect_to(ws("q"), Default::default()).unwrap();
    mesh.pump();

    let expiry = MeshConfig::default().last_seen_expiry_ms;
    mesh.clock().advance(expiry + 1);
    mesh.node_mut("a").tick();
    mesh.pump();

    assert!(mesh.node("a").routing_table().is_empty());
    assert!(mesh.node("q").routing_table().is_empty());
}

#[test]
fn transport_close_drops_peer_and_its_timers() {
    let mut mesh = Mesh::new();
    mesh.add_node("a", &[RoleType::Peer]);
    mesh.add_node("q", &[RoleType::Peer]);
    mesh.node_mut("a").connect_to(ws("q"), Default::default()).unwrap();
    mesh.pump();
    // The fresh link is protected until its protection timer fires.
    assert!(mesh.node("a").routing_table().next_timer_deadline().is_some());

    let mut churn = mesh.node_mut("a").observe_peer_churn();
    mesh.node_mut("a")
        .handle_event(ConnectionEvent::new(ws("q"), ConnectionEventKind::Closed));

    let a = mesh.node("a");
    assert!(a.routing_table().get_peer_by_id("q").is_none());
    assert!(a.routing_table().next_timer_deadline().is_none());
    let removed = churn.try_recv().unwrap();
    assert_eq!(removed.kind, ChurnType::Removed);
    assert_eq!(removed.peer_id, "q");
}

#[test]
fn losing_a_relay_drops_paths_through_it() {
    let mut mesh = Mesh::new();
    for id in ["a", "q"] {
        mesh.add_node(id, &[RoleType::Peer]);
    }
    mesh.node_mut("a").connect_to(ws("q"), Default::default()).unwrap();
    mesh.pump();
    mesh.node_mut("a")
        .connect_to(Address::via("far", "q"), Default::default())
        .unwrap();
    assert!(mesh.node("a").routing_table().get_peer_by_id("far").is_some());

    mesh.node_mut("a")
        .handle_event(ConnectionEvent::new(ws("q"), ConnectionEventKind::Closed));

    assert!(mesh.node("a").routing_table().is_empty());
}

#[test]
fn joining_publishes_peer_churn() {
    let mut mesh = Mesh::with_signal(MeshConfig::default());
    let mut churn = mesh.node_mut(SIGNAL).observe_peer_churn();
    mesh.join("n1");

    let added = churn.try_recv().unwrap();
    assert_eq!(added.kind, ChurnType::Added);
    assert_eq!(added.peer_id, "n1");
}
