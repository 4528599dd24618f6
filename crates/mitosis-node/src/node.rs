//! Mesh node composition and event loop.
//!
//! A [`MeshNode`] owns one routing table, one message broker and the active
//! role set. Transports report into the node's inbox; every state change
//! happens while the node drains that inbox or runs a tick, so nothing in
//! the control plane needs a lock.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mitosis_core::{
    Address, Clock, MeshConfig, MeshError, MeshResult, Message, Protocol, RoleConfig, RoleType,
};
use mitosis_mesh::{
    ChannelTable, ConnectionEvent, ConnectionEventKind, ConnectionOptions, Delivery, EventSink,
    MessageBroker, PeerChurn, PendingConnect, RoleManager, RoutingTable, Transport,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::role::{self, tasks};

/// Snapshot of a node's place in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub peer_id: String,
    pub roles: Vec<RoleType>,
    pub peers: usize,
    pub direct_connections: usize,
    pub via_connections: usize,
}

impl fmt::Display for NodeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roles: Vec<&str> = self.roles.iter().map(RoleType::as_str).collect();
        write!(
            f,
            "{} [{}] peers={} direct={} via={}",
            self.peer_id,
            roles.join(","),
            self.peers,
            self.direct_connections,
            self.via_connections
        )
    }
}

/// One mesh participant.
#[derive(Debug)]
pub struct MeshNode {
    table: RoutingTable,
    broker: MessageBroker,
    roles: RoleManager,
    channels: ChannelTable,
    config: Arc<MeshConfig>,
    sink: EventSink,
    inbox: mpsc::UnboundedReceiver<ConnectionEvent>,
    ticks: u64,
}

impl MeshNode {
    /// Create a node. Fails if the mesh configuration is inconsistent.
    pub fn new(
        my_id: impl Into<String>,
        roles: impl IntoIterator<Item = RoleType>,
        config: MeshConfig,
        clock: Arc<dyn Clock>,
    ) -> MeshResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let (sink, inbox) = mpsc::unbounded_channel();
        let table = RoutingTable::new(my_id, Arc::clone(&config), clock, sink.clone());
        Ok(Self {
            table,
            broker: MessageBroker::new(),
            roles: RoleManager::new(roles),
            channels: ChannelTable::new(),
            config,
            sink,
            inbox,
            ticks: 0,
        })
    }

    /// Create a node from a loaded [`NodeConfig`].
    pub fn from_config(config: &NodeConfig, clock: Arc<dyn Clock>) -> MeshResult<Self> {
        let mut node = Self::new(
            config.peer_id_or_random(),
            config.roles.iter().copied(),
            config.mesh.clone(),
            clock,
        )?;
        node.channels.set_capacity(config.channel_capacity);
        Ok(node)
    }

    /// Handle transports use to report events to this node.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn register_transport(&mut self, protocol: Protocol, transport: Arc<dyn Transport>) {
        self.table.register_transport(protocol, transport);
    }

    pub fn my_id(&self) -> &str {
        self.table.my_id()
    }

    /// This node as the sender of locally originated messages.
    pub fn my_address(&self) -> Address {
        Address::direct(self.my_id(), self.config.default_direct_protocol)
    }

    /// Receiver address for a message to `peer_id`. Routing only looks at
    /// the peer id.
    pub fn address_of(&self, peer_id: &str) -> Address {
        Address::direct(peer_id, self.config.default_direct_protocol)
    }

    pub fn roles(&self) -> &BTreeSet<RoleType> {
        self.roles.roles()
    }

    pub fn has_role(&self, role: RoleType) -> bool {
        self.roles.has_role(role)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Goals of the current role set.
    pub fn effective_goals(&self) -> RoleConfig {
        self.config.effective_goals(self.roles.roles())
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub(crate) fn routing_table_mut(&mut self) -> &mut RoutingTable {
        &mut self.table
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelTable {
        &mut self.channels
    }

    /// Number of ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    // ------------------------------------------------------------------
    // Connecting and sending
    // ------------------------------------------------------------------

    pub fn connect_to(
        &mut self,
        address: Address,
        options: ConnectionOptions,
    ) -> MeshResult<PendingConnect> {
        self.table.connect_to(address, options)
    }

    /// Open a direct connection to a bootstrap signal and remember the
    /// remote peer as one.
    pub fn connect_to_signal(&mut self, address: Address) -> MeshResult<PendingConnect> {
        info!(signal = %address, "connecting to signal");
        self.table
            .connect_to(address, ConnectionOptions::with_roles(vec![RoleType::Signal]))
    }

    pub fn send_message(&mut self, message: &Message) -> MeshResult<()> {
        self.broker.send_message(&mut self.table, message)
    }

    /// Send application content to `peer_id` on the best known path.
    pub fn send_app_content(&mut self, peer_id: &str, content: serde_json::Value) -> MeshResult<()> {
        let message = Message::app_content(self.my_address(), self.address_of(peer_id), content);
        self.send_message(&message)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn observe_incoming_messages(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.broker.observe_incoming_messages()
    }

    pub fn observe_app_content(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.broker.observe_app_content()
    }

    pub fn observe_channel_announcements(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.broker.observe_channel_announcements()
    }

    pub fn observe_messages(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.broker.observe_messages()
    }

    pub fn observe_peer_churn(&mut self) -> mpsc::UnboundedReceiver<PeerChurn> {
        self.table.observe_peer_churn()
    }

    pub fn observe_role_changes(&mut self) -> mpsc::UnboundedReceiver<BTreeSet<RoleType>> {
        self.roles.observe_role_changes()
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Handle every queued event without waiting. Returns how many were
    /// handled.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        let ConnectionEvent { address, kind } = event;
        match kind {
            ConnectionEventKind::Opened => self.table.handle_opened(&address),
            ConnectionEventKind::Closed => self.table.handle_closed(&address),
            ConnectionEventKind::Error(reason) => {
                debug!(%address, %reason, "transport error");
                self.table.handle_error(&address, reason);
            }
            ConnectionEventKind::Incoming(link) => self.table.accept_incoming(address, link),
            ConnectionEventKind::Message(message) => self.handle_message(message, address),
            ConnectionEventKind::Relay(message) => {
                if let Err(err) = self.send_message(&message) {
                    debug!(%address, %message, %err, "handshake step not routed");
                }
            }
        }
    }

    fn handle_message(&mut self, message: Message, arrival: Address) {
        if self.table.connection(&arrival).is_none() {
            trace!(%arrival, %message, "message on unknown connection dropped");
            return;
        }
        let delivery = self
            .broker
            .handle_message(&mut self.table, &mut self.roles, message, &arrival);
        match delivery {
            Ok(Delivery::Delivered(message)) => {
                let roles: Vec<RoleType> = self.roles.roles().iter().copied().collect();
                for role in roles {
                    role::behaviour(role).on_message(self, &message);
                }
            }
            Ok(Delivery::Forwarded | Delivery::Dropped) => {}
            Err(MeshError::Protocol(err)) => {
                warn!(%arrival, %err, "protocol violation");
                self.table.punish(&arrival);
            }
            Err(err) => debug!(%arrival, %err, "message handling failed"),
        }
    }

    /// One maintenance round: timers, silent links, role duties, then the
    /// events those produced.
    pub fn tick(&mut self) {
        self.ticks += 1;
        self.process_events();
        self.table.fire_due_timers();
        self.table.expire_silent_connections();

        let roles: Vec<RoleType> = self.roles.roles().iter().copied().collect();
        for role in &roles {
            role::behaviour(*role).on_tick(self);
        }
        if roles.iter().any(|r| role::behaviour(*r).maintains_connection_goal()) {
            tasks::satisfy_connection_goal(self);
        }
        tasks::release_unrequired_peers(self);
        self.process_events();
    }

    /// Drive the node until `shutdown` completes. Returns the node so its
    /// final state can be inspected.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Self {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut last_summary = self.summary();
        info!(node = %self.my_id(), "mesh node running");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(node = %self.my_id(), "shutting down");
                    break;
                }
                Some(event) = self.inbox.recv() => self.handle_event(event),
                _ = ticker.tick() => {
                    self.tick();
                    let summary = self.summary();
                    if summary != last_summary {
                        info!(%summary, "topology changed");
                        last_summary = summary;
                    }
                }
            }
        }
        self
    }

    pub fn summary(&self) -> NodeSummary {
        let mut direct_connections = 0;
        let mut via_connections = 0;
        for peer in self.table.peers() {
            for connection in peer.connection_table().iter() {
                if connection.is_via() {
                    via_connections += 1;
                } else {
                    direct_connections += 1;
                }
            }
        }
        NodeSummary {
            peer_id: self.my_id().to_string(),
            roles: self.roles.roles().iter().copied().collect(),
            peers: self.table.len(),
            direct_connections,
            via_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, pump, ws};
    use mitosis_core::{ConnectionError, ManualClock, MessageBody, RoutingError};
    use mitosis_mesh::LoopbackNetwork;

    #[test]
    fn invalid_config_is_refused() {
        let mut config = MeshConfig::default();
        config.default_quality = 2.0;
        let err = MeshNode::new("a", [RoleType::Peer], config, Arc::new(ManualClock::new(0)))
            .unwrap_err();
        assert!(matches!(err, MeshError::Config(_)));
    }

    #[test]
    fn from_config_applies_identity_and_capacity() {
        let config = NodeConfig {
            peer_id: Some("alpha".into()),
            roles: vec![RoleType::Signal],
            channel_capacity: 3,
            ..NodeConfig::default()
        };
        let node = MeshNode::from_config(&config, Arc::new(ManualClock::new(0))).unwrap();
        assert_eq!(node.my_id(), "alpha");
        assert!(node.has_role(RoleType::Signal));
        assert_eq!(node.channels().capacity(), 3);
    }

    #[test]
    fn signal_connection_tags_remote_role() {
        let network = LoopbackNetwork::new();
        let mut a = node(&network, "a", &[RoleType::Newbie]);
        let mut s = node(&network, "s", &[RoleType::Signal]);

        let mut pending = a.connect_to_signal(ws("s")).unwrap();
        pump(&mut [&mut a, &mut s]);

        assert_eq!(pending.try_result(), Some(Ok("s".to_string())));
        assert!(a.routing_table().get_peer_by_id("s").unwrap().has_role(RoleType::Signal));
        assert!(s.routing_table().connection(&ws("a")).unwrap().is_open());
    }

    #[test]
    fn app_content_reaches_the_remote_observer() {
        let network = LoopbackNetwork::new();
        let mut a = node(&network, "a", &[RoleType::Peer]);
        let mut b = node(&network, "b", &[RoleType::Peer]);
        let mut content = b.observe_app_content();

        a.connect_to(ws("b"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut a, &mut b]);
        a.send_app_content("b", serde_json::json!({"hello": "mesh"})).unwrap();
        pump(&mut [&mut a, &mut b]);

        let message = content.try_recv().unwrap();
        assert_eq!(message.sender().peer_id(), "a");
        assert!(matches!(message.body(), MessageBody::AppContent(v) if v["hello"] == "mesh"));
    }

    #[test]
    fn sending_to_unknown_peer_fails() {
        let network = LoopbackNetwork::new();
        let mut a = node(&network, "a", &[RoleType::Peer]);
        let err = a.send_app_content("ghost", serde_json::json!(null)).unwrap_err();
        assert_eq!(err, MeshError::Routing(RoutingError::PeerNotFound("ghost".into())));
    }

    #[test]
    fn messages_on_unknown_connections_are_ignored() {
        let network = LoopbackNetwork::new();
        let mut a = node(&network, "a", &[RoleType::Peer]);
        let mut incoming = a.observe_incoming_messages();
        let message = Message::app_content(ws("x"), ws("a"), serde_json::json!(1));
        a.handle_event(ConnectionEvent::new(ws("x"), ConnectionEventKind::Message(message)));
        assert!(incoming.try_recv().is_err());
        assert!(a.routing_table().is_empty());
    }

    #[test]
    fn protocol_violation_punishes_arrival_connection() {
        let network = LoopbackNetwork::new();
        let mut a = node(&network, "a", &[RoleType::Peer]);
        let mut b = node(&network, "b", &[RoleType::Peer]);
        a.connect_to(ws("b"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut a, &mut b]);

        // b is not a signal as far as a knows.
        let forged = Message::role_update(ws("b"), ws("a"), vec![RoleType::Router]);
        a.handle_event(ConnectionEvent::new(ws("b"), ConnectionEventKind::Message(forged)));

        assert!(!a.has_role(RoleType::Router));
        let conn = a.routing_table().connection(&ws("b")).unwrap();
        assert!(conn.meter().is_punished());
    }

    #[test]
    fn transport_error_removes_the_connection() {
        let network = LoopbackNetwork::new();
        let mut a = node(&network, "a", &[RoleType::Peer]);
        let mut b = node(&network, "b", &[RoleType::Peer]);
        let pending = a.connect_to(ws("b"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut a, &mut b]);
        drop(pending);

        a.handle_event(ConnectionEvent::new(ws("b"), ConnectionEventKind::Error("reset".into())));
        assert!(a.routing_table().get_peer_by_id("b").is_none());
    }

    #[test]
    fn connecting_without_transport_fails() {
        let clock = Arc::new(ManualClock::new(0));
        let mut lonely = MeshNode::new("a", [RoleType::Peer], MeshConfig::default(), clock).unwrap();
        let err = lonely.connect_to(ws("b"), ConnectionOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            MeshError::Connection(ConnectionError::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn summary_counts_connection_kinds() {
        let network = LoopbackNetwork::new();
        let mut a = node(&network, "a", &[RoleType::Peer]);
        let mut b = node(&network, "b", &[RoleType::Peer]);
        a.connect_to(ws("b"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut a, &mut b]);
        a.connect_to(Address::via("c", "b"), ConnectionOptions::with_quality(0.5))
            .unwrap();

        let summary = a.summary();
        assert_eq!(summary.peers, 2);
        assert_eq!(summary.direct_connections, 1);
        assert_eq!(summary.via_connections, 1);
        assert_eq!(summary.to_string(), "a [peer] peers=2 direct=1 via=1");
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let network = LoopbackNetwork::new();
        let a = node(&network, "a", &[RoleType::Peer]);
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(a.run(async move {
            let _ = stopped.await;
        }));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        stop.send(()).unwrap();
        let a = handle.await.unwrap();
        assert!(a.ticks() >= 3);
    }
}
