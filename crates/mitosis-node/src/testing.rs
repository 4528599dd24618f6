//! Loopback fixtures shared by the unit tests.

use std::sync::Arc;

use mitosis_core::{Address, ManualClock, MeshConfig, Protocol, RoleType};
use mitosis_mesh::LoopbackNetwork;

use crate::node::MeshNode;

pub(crate) fn ws(peer: &str) -> Address {
    Address::direct(peer, Protocol::WebSocket)
}

/// A node on `network` speaking websocket and WebRTC data.
pub(crate) fn node(network: &LoopbackNetwork, id: &str, roles: &[RoleType]) -> MeshNode {
    node_with(network, id, roles, MeshConfig::default(), ManualClock::new(0))
}

pub(crate) fn node_with(
    network: &LoopbackNetwork,
    id: &str,
    roles: &[RoleType],
    config: MeshConfig,
    clock: ManualClock,
) -> MeshNode {
    let mut node = MeshNode::new(id, roles.iter().copied(), config, Arc::new(clock)).unwrap();
    network.register(id, node.sink());
    for protocol in [Protocol::WebSocket, Protocol::WebRtcData] {
        node.register_transport(protocol, network.transport(protocol));
    }
    node
}

/// Drain every inbox until no node has anything left to handle.
pub(crate) fn pump(nodes: &mut [&mut MeshNode]) {
    for _ in 0..50 {
        let handled: usize = nodes.iter_mut().map(|n| n.process_events()).sum();
        if handled == 0 {
            return;
        }
    }
    panic!("nodes did not settle");
}
