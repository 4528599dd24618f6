//! The authoritative registry of remote peers and their connections.
//!
//! The routing table is the only owner of [`RemotePeer`]s and
//! [`Connection`]s. A peer is created by the first connection to it and
//! removed when its last connection reaches a terminal state. Removing a
//! direct connection that leaves a peer without live direct links also
//! closes every VIA connection relaying through that peer.

use crate::connection::{Connection, ConnectionState};
use crate::metering::RemotePeerMeter;
use crate::peer::{ChurnType, ConnectionChurn, RemotePeer};
use crate::transport::{ConnectionOptions, EventSink, Link, Transport};
use mitosis_core::{
    Address, Clock, ConnectionError, ConnectionNegotiation, MeshConfig, MeshResult, Message,
    Protocol, ProtocolError, RoleType, RoutingError, Subject, TimerQueue,
};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Deferred work kept in the routing table's timer queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    OpenTimeout(Address),
    PunishmentExpired(Address),
    ProtectionExpired(Address),
}

impl TimerEvent {
    pub fn address(&self) -> &Address {
        match self {
            TimerEvent::OpenTimeout(a)
            | TimerEvent::PunishmentExpired(a)
            | TimerEvent::ProtectionExpired(a) => a,
        }
    }
}

/// A peer entered or left the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerChurn {
    pub kind: ChurnType,
    pub peer_id: String,
}

/// Completion handle returned by [`RoutingTable::connect_to`].
///
/// Resolves with the remote peer id once the connection is OPEN, or with
/// the reason it closed first.
#[derive(Debug)]
pub struct PendingConnect {
    address: Address,
    rx: oneshot::Receiver<MeshResult<String>>,
}

impl PendingConnect {
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Non-blocking poll. `None` while the connection is still opening.
    pub fn try_result(&mut self) -> Option<MeshResult<String>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(ConnectionError::Closed(self.address.to_string()).into()))
            }
        }
    }

    pub async fn wait(self) -> MeshResult<String> {
        let address = self.address;
        self.rx
            .await
            .unwrap_or_else(|_| Err(ConnectionError::Closed(address.to_string()).into()))
    }
}

#[derive(Debug)]
pub struct RoutingTable {
    my_id: String,
    config: Arc<MeshConfig>,
    clock: Arc<dyn Clock>,
    sink: EventSink,
    transports: HashMap<Protocol, Arc<dyn Transport>>,
    peers: BTreeMap<String, RemotePeer>,
    timers: TimerQueue<TimerEvent>,
    peer_churn: Subject<PeerChurn>,
}

impl RoutingTable {
    /// `sink` is handed to every link the table creates.
    pub fn new(
        my_id: impl Into<String>,
        config: Arc<MeshConfig>,
        clock: Arc<dyn Clock>,
        sink: EventSink,
    ) -> Self {
        Self {
            my_id: my_id.into(),
            config,
            clock,
            sink,
            transports: HashMap::new(),
            peers: BTreeMap::new(),
            timers: TimerQueue::new(),
            peer_churn: Subject::new(),
        }
    }

    pub fn register_transport(&mut self, protocol: Protocol, transport: Arc<dyn Transport>) {
        if !protocol.is_direct() {
            warn!(%protocol, "ignoring transport for a logical protocol");
            return;
        }
        self.transports.insert(protocol, transport);
    }

    pub fn my_id(&self) -> &str {
        &self.my_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn peers(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    pub fn get_peer_by_id(&self, peer_id: &str) -> Option<&RemotePeer> {
        self.peers.get(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn connection(&self, address: &Address) -> Option<&Connection> {
        self.peers
            .get(address.peer_id())?
            .connection_table()
            .get(address)
    }

    pub fn meter(&self, peer_id: &str) -> Option<RemotePeerMeter<'_>> {
        self.peers
            .get(peer_id)
            .map(|peer| RemotePeerMeter::new(peer, self))
    }

    /// Peers holding an OPEN or OPENING direct data connection.
    pub fn direct_peer_ids(&self) -> Vec<String> {
        self.peers
            .values()
            .filter(|p| p.has_live_direct_connection())
            .map(|p| p.id().to_string())
            .collect()
    }

    /// Earliest pending timer deadline.
    pub fn next_timer_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn observe_peer_churn(&mut self) -> mpsc::UnboundedReceiver<PeerChurn> {
        self.peer_churn.subscribe()
    }

    pub fn observe_connection_churn(
        &mut self,
        peer_id: &str,
    ) -> Option<mpsc::UnboundedReceiver<ConnectionChurn>> {
        self.peers.get_mut(peer_id).map(RemotePeer::observe_churn)
    }

    /// Merge `roles` into what is known about `peer_id`. Roles are never
    /// removed. Returns `true` if the peer's role set grew.
    pub fn add_roles(&mut self, peer_id: &str, roles: &[RoleType]) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(peer) => peer.add_roles(roles.iter().copied()),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Connecting
    // ------------------------------------------------------------------

    /// Open a connection to `address`, or join the one already open or
    /// opening under the same `(peer, protocol, location)` key.
    pub fn connect_to(
        &mut self,
        address: Address,
        options: ConnectionOptions,
    ) -> MeshResult<PendingConnect> {
        address.validate()?;
        if address.peer_id() == self.my_id {
            return Err(RoutingError::SelfAddress(address.to_string()).into());
        }
        if address.location() == Some(self.my_id.as_str()) {
            return Err(RoutingError::InvalidAddress(format!("{address} relays through this node")).into());
        }

        let (tx, rx) = oneshot::channel();
        let pending = PendingConnect {
            address: address.clone(),
            rx,
        };

        if let Some(peer) = self.peers.get_mut(address.peer_id()) {
            peer.add_roles(options.roles.iter().copied());
            if let Some(existing) = peer.connection_mut(&address) {
                if existing.state() == ConnectionState::Closing {
                    return Err(ConnectionError::Closing(address.to_string()).into());
                }
                if let Some(quality) = options.quality {
                    existing.set_via_quality(quality);
                }
                existing.add_waiter(tx);
                trace!(%address, "joining existing connection");
                return Ok(pending);
            }
        }

        if let Some(location) = address.location() {
            let relay_alive = self
                .peers
                .get(location)
                .is_some_and(RemotePeer::has_live_direct_connection);
            if !relay_alive {
                return Err(RoutingError::AllPathsLost(location.to_string()).into());
            }
        }

        let now = self.clock.now_ms();
        let mut connection = if address.is_via() {
            Connection::via(address.clone(), options.clone(), self.config.default_quality, now)
        } else {
            let transport = self
                .transports
                .get(&address.protocol())
                .ok_or_else(|| ConnectionError::UnsupportedProtocol(address.protocol().to_string()))?;
            let link = transport.connect(&self.my_id, &address, self.sink.clone())?;
            Connection::direct(address.clone(), link, options.clone(), now)
        };
        connection.add_waiter(tx);

        let peer = self.ensure_peer(address.peer_id());
        peer.add_roles(options.roles.iter().copied());
        peer.add_connection(connection).map_err(|c| ConnectionError::Transport {
            address: c.address().to_string(),
            reason: "duplicate connection key".into(),
        })?;
        debug!(%address, "opening connection");

        match self.connection_mut(&address).map(Connection::open) {
            Some(Ok(())) if address.is_via() => self.on_connection_open(&address),
            Some(Ok(())) => {
                self.timers.schedule(
                    now,
                    self.config.open_timeout_ms,
                    TimerEvent::OpenTimeout(address.clone()),
                );
            }
            Some(Err(err)) => {
                warn!(%address, %err, "connection failed to open");
                self.remove_connection(&address);
            }
            None => {}
        }
        Ok(pending)
    }

    /// Register a connection a remote endpoint opened towards us.
    pub fn accept_incoming(&mut self, address: Address, link: Box<dyn Link>) {
        if address.is_via() || address.validate().is_err() || address.peer_id() == self.my_id {
            warn!(%address, "refusing incoming connection");
            return;
        }
        if self.connection(&address).is_some() {
            debug!(%address, "duplicate incoming connection ignored");
            return;
        }
        let connection = Connection::accepted(address.clone(), link, self.clock.now_ms());
        if self.ensure_peer(address.peer_id()).add_connection(connection).is_ok() {
            debug!(%address, "incoming connection accepted");
            self.on_connection_open(&address);
        }
    }

    /// Feed the remote side's handshake answer to the connection opening
    /// towards `address`.
    pub fn negotiate(
        &mut self,
        address: &Address,
        negotiation: &ConnectionNegotiation,
    ) -> MeshResult<()> {
        let connection = self
            .connection_mut(address)
            .filter(|c| c.state() == ConnectionState::Opening)
            .ok_or_else(|| ProtocolError::NoPendingNegotiation(address.to_string()))?;
        connection.negotiate(negotiation)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport notifications
    // ------------------------------------------------------------------

    pub fn handle_opened(&mut self, address: &Address) {
        let Some(connection) = self.connection_mut(address) else {
            trace!(%address, "open notification for unknown connection");
            return;
        };
        if connection.on_open() {
            self.timers
                .cancel_where(|e| matches!(e, TimerEvent::OpenTimeout(a) if a == address));
            debug!(%address, "connection open");
            self.on_connection_open(address);
        }
    }

    pub fn handle_closed(&mut self, address: &Address) {
        if self.discard_connection(address) {
            debug!(%address, "connection closed");
        }
    }

    pub fn handle_error(&mut self, address: &Address, reason: String) {
        if let Some(connection) = self.connection_mut(address) {
            connection.on_error(ConnectionError::Transport {
                address: address.to_string(),
                reason,
            });
            self.remove_connection(address);
        }
    }

    /// Record traffic on the connection a message arrived on.
    pub fn record_traffic(&mut self, address: &Address) {
        let now = self.clock.now_ms();
        if let Some(connection) = self.connection_mut(address) {
            connection.meter_mut().seen(now);
        }
    }

    /// Record how well `peer_id` was reachable for one delivered message.
    pub fn record_router_alive(&mut self, peer_id: &str, ranking: f64) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.router_alive_mut().record(ranking);
        }
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Begin closing one connection. VIA connections are removed at once;
    /// direct ones when their link confirms.
    pub fn close_connection(&mut self, address: &Address) -> bool {
        let Some(connection) = self.connection_mut(address) else {
            return false;
        };
        connection.close();
        if connection.state() == ConnectionState::Closed {
            self.remove_connection(address);
        }
        true
    }

    /// Drop a connection without asking its link to close. Used when the
    /// remote side already owns the other end, e.g. when yielding to a
    /// colliding handshake.
    pub fn discard_connection(&mut self, address: &Address) -> bool {
        let Some(connection) = self.connection_mut(address) else {
            return false;
        };
        connection.on_close(None);
        self.remove_connection(address);
        true
    }

    /// Close every connection to `peer_id`. The peer leaves the table once
    /// the last one is closed.
    pub fn remove_peer(&mut self, peer_id: &str) {
        let addresses = match self.peers.get(peer_id) {
            Some(peer) => peer.connection_table().view().addresses(),
            None => return,
        };
        for address in &addresses {
            self.close_connection(address);
        }
    }

    /// Close VIA connections relaying through `location` that were learned
    /// from an advertisement but whose target is no longer in `advertised`.
    /// Returns how many were closed.
    pub fn prune_advertised_via(&mut self, location: &str, advertised: &[&str]) -> usize {
        let stale: Vec<Address> = self
            .peers
            .values()
            .filter(|p| !advertised.contains(&p.id()))
            .flat_map(|p| {
                p.connection_table()
                    .view()
                    .filter_via()
                    .filter_by_location(location)
                    .filter(|c| c.options().quality.is_some())
                    .addresses()
            })
            .collect();
        for address in &stale {
            debug!(%address, "advertised path withdrawn");
            self.close_connection(address);
        }
        stale.len()
    }

    /// Close OPEN direct connections that carried no traffic within the
    /// expiry window. Returns how many were closed.
    pub fn expire_silent_connections(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expiry = self.config.last_seen_expiry_ms;
        let silent: Vec<Address> = self
            .peers
            .values()
            .flat_map(|p| {
                p.connection_table()
                    .view()
                    .filter_direct()
                    .filter_by_states(&[ConnectionState::Open])
                    .filter(|c| c.meter().is_last_seen_expired(now, expiry))
                    .addresses()
            })
            .collect();
        for address in &silent {
            info!(%address, "closing silent connection");
            self.close_connection(address);
        }
        silent.len()
    }

    // ------------------------------------------------------------------
    // Trust
    // ------------------------------------------------------------------

    /// Punish a connection for `punishment_time_ms`.
    pub fn punish(&mut self, address: &Address) -> bool {
        let now = self.clock.now_ms();
        let Some(connection) = self.connection_mut(address) else {
            return false;
        };
        connection.meter_mut().punish();
        self.timers.schedule(
            now,
            self.config.punishment_time_ms,
            TimerEvent::PunishmentExpired(address.clone()),
        );
        true
    }

    /// Fire every timer that is due. Returns how many fired.
    pub fn fire_due_timers(&mut self) -> usize {
        let due = self.timers.drain_due(self.clock.now_ms());
        let fired = due.len();
        for event in due {
            match event {
                TimerEvent::OpenTimeout(address) => {
                    let timed_out = match self.connection_mut(&address) {
                        Some(c) if c.state() == ConnectionState::Opening => {
                            c.on_error(ConnectionError::OpenTimeout(address.to_string()));
                            true
                        }
                        _ => false,
                    };
                    if timed_out {
                        warn!(%address, "connection open timed out");
                        self.remove_connection(&address);
                    }
                }
                TimerEvent::PunishmentExpired(address) => {
                    if let Some(c) = self.connection_mut(&address) {
                        c.meter_mut().unpunish();
                    }
                }
                TimerEvent::ProtectionExpired(address) => {
                    if let Some(c) = self.connection_mut(&address) {
                        c.meter_mut().unprotect();
                    }
                }
            }
        }
        fired
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a locally originated message on the best path to its receiver.
    pub fn send_message(&mut self, message: &Message) -> MeshResult<()> {
        self.route(message, None)
    }

    /// Relay a message that arrived from `arrival_peer`. Paths relaying
    /// back through `arrival_peer` are not considered.
    pub fn forward_message(&mut self, message: &Message, arrival_peer: &str) -> MeshResult<()> {
        self.route(message, Some(arrival_peer))
    }

    fn route(&mut self, message: &Message, exclude_relay: Option<&str>) -> MeshResult<()> {
        let receiver = message.receiver().peer_id();
        let peer = self
            .peers
            .get(receiver)
            .ok_or_else(|| RoutingError::PeerNotFound(receiver.to_string()))?;
        let best = peer
            .connection_table()
            .view()
            .filter_by_states(&[ConnectionState::Open])
            .filter(|c| c.is_via() || c.address().protocol().is_direct_data())
            .filter(|c| match exclude_relay {
                Some(relay) => c.address().location() != Some(relay),
                None => true,
            })
            .sort_by_quality()
            .first()
            .map(|c| c.address().clone())
            .ok_or_else(|| RoutingError::AllPathsLost(receiver.to_string()))?;

        let hop = match best.location().map(str::to_owned) {
            Some(location) => self
                .peers
                .get(&location)
                .and_then(RemotePeer::best_direct_connection)
                .map(|c| c.address().clone())
                .ok_or_else(|| RoutingError::AllPathsLost(receiver.to_string()))?,
            None => best,
        };

        trace!(%message, %hop, "sending");
        let connection = self
            .connection_mut(&hop)
            .ok_or_else(|| RoutingError::AllPathsLost(receiver.to_string()))?;
        connection.send(message)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn connection_mut(&mut self, address: &Address) -> Option<&mut Connection> {
        self.peers
            .get_mut(address.peer_id())?
            .connection_mut(address)
    }

    fn ensure_peer(&mut self, peer_id: &str) -> &mut RemotePeer {
        match self.peers.entry(peer_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(peer = peer_id, "peer added");
                self.peer_churn.publish(PeerChurn {
                    kind: ChurnType::Added,
                    peer_id: peer_id.to_string(),
                });
                entry.insert(RemotePeer::new(peer_id, self.config.router_alive_history))
            }
        }
    }

    fn on_connection_open(&mut self, address: &Address) {
        let now = self.clock.now_ms();
        if let Some(connection) = self.connection_mut(address) {
            connection.meter_mut().seen(now);
            connection.meter_mut().protect();
            self.timers.schedule(
                now,
                self.config.protection_time_ms,
                TimerEvent::ProtectionExpired(address.clone()),
            );
        }
    }

    fn remove_connection(&mut self, address: &Address) -> Option<Connection> {
        let peer = self.peers.get_mut(address.peer_id())?;
        let mut removed = peer.remove_connection(address)?;
        removed.on_close(None);
        let peer_empty = peer.connection_table().is_empty();
        let relay_lost = removed.is_direct() && !peer.has_live_direct_connection();

        self.timers.cancel_where(|e| e.address() == address);
        if peer_empty {
            self.peers.remove(address.peer_id());
            debug!(peer = address.peer_id(), "peer removed");
            self.peer_churn.publish(PeerChurn {
                kind: ChurnType::Removed,
                peer_id: address.peer_id().to_string(),
            });
        }
        if relay_lost {
            self.close_relays_through(address.peer_id());
        }
        Some(removed)
    }

    fn close_relays_through(&mut self, location: &str) {
        let relays: Vec<Address> = self
            .peers
            .values()
            .flat_map(|p| {
                p.connection_table()
                    .view()
                    .filter_via()
                    .filter_by_location(location)
                    .addresses()
            })
            .collect();
        for address in &relays {
            debug!(%address, "relay lost");
            self.close_connection(address);
        }
    }
}
