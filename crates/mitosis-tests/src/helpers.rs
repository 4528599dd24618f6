//! Shared fixtures for the multi-node scenarios.

use std::sync::Arc;

use mitosis_core::{Address, ManualClock, MeshConfig, Protocol, RoleType};
use mitosis_mesh::{ConnectionState, LoopbackNetwork};
use mitosis_node_lib::MeshNode;

/// Peer id of the bootstrap signal in every scenario.
pub const SIGNAL: &str = "signal";

/// Upper bound on drain rounds before a scenario is declared livelocked.
const MAX_PUMP_ROUNDS: usize = 200;

pub fn ws(peer: &str) -> Address {
    Address::direct(peer, Protocol::WebSocket)
}

pub fn rtc(peer: &str) -> Address {
    Address::direct(peer, Protocol::WebRtcData)
}

/// A set of nodes on one loopback network sharing one virtual clock.
pub struct Mesh {
    network: LoopbackNetwork,
    clock: ManualClock,
    config: MeshConfig,
    nodes: Vec<MeshNode>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::with_config(MeshConfig::default())
    }

    pub fn with_config(config: MeshConfig) -> Self {
        Self {
            network: LoopbackNetwork::new(),
            clock: ManualClock::new(0),
            config,
            nodes: Vec::new(),
        }
    }

    /// A mesh that already contains the bootstrap signal.
    pub fn with_signal(config: MeshConfig) -> Self {
        let mut mesh = Self::with_config(config);
        mesh.add_node(SIGNAL, &[RoleType::Signal]);
        mesh
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    /// Add a node speaking websocket and WebRTC data.
    pub fn add_node(&mut self, id: &str, roles: &[RoleType]) -> &mut MeshNode {
        let mut node = MeshNode::new(
            id,
            roles.iter().copied(),
            self.config.clone(),
            Arc::new(self.clock.clone()),
        )
        .expect("valid mesh config");
        self.network.register(id, node.sink());
        for protocol in [Protocol::WebSocket, Protocol::WebRtcData] {
            node.register_transport(protocol, self.network.transport(protocol));
        }
        self.nodes.push(node);
        self.nodes.last_mut().expect("just pushed")
    }

    /// Add a newbie, connect it to the signal and let it introduce itself.
    pub fn join(&mut self, id: &str) -> &mut MeshNode {
        self.add_node(id, &[RoleType::Newbie])
            .connect_to_signal(ws(SIGNAL))
            .expect("signal reachable");
        self.pump();
        self.node_mut(id).tick();
        self.pump();
        self.node_mut(id)
    }

    pub fn node(&self, id: &str) -> &MeshNode {
        self.nodes
            .iter()
            .find(|n| n.my_id() == id)
            .unwrap_or_else(|| panic!("no node {id}"))
    }

    pub fn node_mut(&mut self, id: &str) -> &mut MeshNode {
        self.nodes
            .iter_mut()
            .find(|n| n.my_id() == id)
            .unwrap_or_else(|| panic!("no node {id}"))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &MeshNode> {
        self.nodes.iter()
    }

    /// Drain every inbox until no node has anything left to handle.
    pub fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let handled: usize = self.nodes.iter_mut().map(MeshNode::process_events).sum();
            if handled == 0 {
                return;
            }
        }
        panic!("mesh did not settle after {MAX_PUMP_ROUNDS} rounds");
    }

    /// Advance the clock by one tick interval and tick every node.
    pub fn tick_all(&mut self) {
        self.clock.advance(self.config.tick_interval_ms);
        for node in &mut self.nodes {
            node.tick();
        }
        self.pump();
    }

    pub fn run_ticks(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.tick_all();
        }
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids of the peers `node` holds an OPEN direct connection to.
pub fn direct_peers(node: &MeshNode) -> Vec<String> {
    node.routing_table()
        .peers()
        .filter(|p| {
            !p.connection_table()
                .view()
                .filter_direct()
                .filter_by_states(&[ConnectionState::Open])
                .is_empty()
        })
        .map(|p| p.id().to_string())
        .collect()
}

/// State of the connection `node` keeps under `address`, if any.
pub fn connection_state(node: &MeshNode, address: &Address) -> Option<ConnectionState> {
    node.routing_table().connection(address).map(|c| c.state())
}
