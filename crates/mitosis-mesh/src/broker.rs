//! Message classification, dispatch and forwarding.
//!
//! Every message that reaches the node passes through
//! [`MessageBroker::handle_message`]. Messages for other peers are relayed
//! on the best path; messages for this node update the routing table or the
//! role set and are then published to observers.

use crate::connection::{Connection, ConnectionState};
use crate::role_manager::RoleManager;
use crate::routing_table::RoutingTable;
use crate::transport::ConnectionOptions;
use mitosis_core::{
    Address, ConnectionNegotiation, MeshResult, Message, MessageBody, NegotiationType,
    PeerUpdateEntry, ProtocolError, RoleType, Subject,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Outcome of handling one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Addressed to this node and processed.
    Delivered(Message),
    /// Relayed towards its receiver.
    Forwarded,
    /// Addressed to another peer that could not be reached.
    Dropped,
}

#[derive(Debug, Default)]
pub struct MessageBroker {
    incoming: Subject<Message>,
    app_content: Subject<Message>,
    channel_announcements: Subject<Message>,
    messages: Subject<Message>,
}

impl MessageBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message handed to the broker, before classification.
    pub fn observe_incoming_messages(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.incoming.subscribe()
    }

    /// APP_CONTENT messages addressed to this node.
    pub fn observe_app_content(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.app_content.subscribe()
    }

    /// CHANNEL_ANNOUNCEMENT messages addressed to this node.
    pub fn observe_channel_announcements(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.channel_announcements.subscribe()
    }

    /// Every message addressed to this node that was processed successfully.
    pub fn observe_messages(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.messages.subscribe()
    }

    /// Send a locally originated message.
    pub fn send_message(&self, table: &mut RoutingTable, message: &Message) -> MeshResult<()> {
        table.send_message(message)
    }

    /// Handle a message that arrived on the connection `arrival`.
    ///
    /// A protocol violation is returned as an error after the message has
    /// been published as incoming; the caller decides on punishment.
    pub fn handle_message(
        &mut self,
        table: &mut RoutingTable,
        roles: &mut RoleManager,
        message: Message,
        arrival: &Address,
    ) -> MeshResult<Delivery> {
        self.incoming.publish(message.clone());
        table.record_traffic(arrival);

        if message.receiver().peer_id() != table.my_id() {
            return Ok(self.forward_message(table, &message, arrival));
        }
        self.receive_message(table, roles, message, arrival)
    }

    fn forward_message(&self, table: &mut RoutingTable, message: &Message, arrival: &Address) -> Delivery {
        match table.forward_message(message, arrival.peer_id()) {
            Ok(()) => {
                trace!(%message, "forwarded");
                Delivery::Forwarded
            }
            Err(err) => {
                error!(%message, %err, "dropping message");
                Delivery::Dropped
            }
        }
    }

    fn receive_message(
        &mut self,
        table: &mut RoutingTable,
        roles: &mut RoleManager,
        message: Message,
        arrival: &Address,
    ) -> MeshResult<Delivery> {
        self.authorize(table, &message, arrival)?;

        let sender = message.sender().peer_id();
        self.ensure_via_connection(table, sender, arrival.peer_id());
        let ranking = if sender == arrival.peer_id() {
            1.0
        } else {
            table
                .connection(&Address::via(sender, arrival.peer_id()))
                .map_or(table.config().default_quality, Connection::quality)
        };
        table.record_router_alive(sender, ranking);

        match message.body() {
            MessageBody::RoleUpdate(granted) => self.update_roles(roles, &message, granted),
            MessageBody::PeerUpdate(entries) => self.update_peers(table, &message, entries, arrival),
            MessageBody::ConnectionNegotiation(negotiation) => {
                self.negotiate_connection(table, &message, negotiation)?
            }
            MessageBody::AppContent(_) => self.app_content.publish(message.clone()),
            MessageBody::ChannelAnnouncement(_) => self.channel_announcements.publish(message.clone()),
            MessageBody::Introduction => {}
        }

        self.messages.publish(message.clone());
        Ok(Delivery::Delivered(message))
    }

    /// Remember that `sender` is reachable through the direct peer `via`.
    fn ensure_via_connection(&self, table: &mut RoutingTable, sender: &str, via: &str) {
        if sender == via || sender == table.my_id() {
            return;
        }
        let address = Address::via(sender, via);
        match table.connect_to(address.clone(), ConnectionOptions::default()) {
            Ok(_) => table.record_traffic(&address),
            Err(err) => debug!(%address, %err, "cannot track relay path"),
        }
    }

    /// Reject role and peer updates from senders not entitled to send them.
    /// Runs before the message touches the routing table.
    ///
    /// Only a peer known to be a signal may grant roles. Peer updates are
    /// accepted from direct neighbours, or relayed by a third party while a
    /// direct connection to the sender is still being negotiated.
    fn authorize(&self, table: &RoutingTable, message: &Message, arrival: &Address) -> MeshResult<()> {
        let sender = message.sender().peer_id();
        match message.body() {
            MessageBody::RoleUpdate(_) => {
                let authorized = table
                    .get_peer_by_id(sender)
                    .is_some_and(|peer| peer.has_role(RoleType::Signal));
                if !authorized {
                    return Err(ProtocolError::UnauthorizedRoleUpdate {
                        receiver: table.my_id().to_string(),
                        sender: sender.to_string(),
                    }
                    .into());
                }
            }
            MessageBody::PeerUpdate(_) if sender != arrival.peer_id() => {
                let negotiating = table.get_peer_by_id(sender).is_some_and(|peer| {
                    !peer
                        .connection_table()
                        .view()
                        .filter_direct()
                        .filter_by_states(&[ConnectionState::Opening])
                        .is_empty()
                });
                if !negotiating {
                    return Err(ProtocolError::UnauthorizedPeerUpdate {
                        receiver: table.my_id().to_string(),
                        sender: sender.to_string(),
                        via: arrival.peer_id().to_string(),
                    }
                    .into());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn update_roles(&self, roles: &mut RoleManager, message: &Message, granted: &[RoleType]) {
        if roles.merge(granted) {
            info!(sender = %message.sender().peer_id(), roles = ?roles.roles(), "roles granted");
        }
    }

    /// Learn VIA paths from an authorized peer update.
    fn update_peers(
        &self,
        table: &mut RoutingTable,
        message: &Message,
        entries: &[PeerUpdateEntry],
        arrival: &Address,
    ) {
        let sender = message.sender().peer_id();
        let via = arrival.peer_id();

        for entry in entries {
            if entry.peer_id == table.my_id() || entry.peer_id == sender {
                continue;
            }
            // Signal status is only ever configured locally.
            let roles = entry
                .roles
                .iter()
                .copied()
                .filter(|role| *role != RoleType::Signal)
                .collect();
            let options = ConnectionOptions {
                quality: Some(entry.quality),
                roles,
                negotiation: None,
            };
            let address = Address::via(&entry.peer_id, sender);
            if let Err(err) = table.connect_to(address.clone(), options) {
                debug!(%address, %err, "ignoring advertised peer");
            }
        }

        if sender == via {
            let advertised: Vec<&str> = entries.iter().map(|e| e.peer_id.as_str()).collect();
            table.prune_advertised_via(sender, &advertised);
        }
    }

    /// Drive a negotiated connection with the message's sender.
    ///
    /// When both sides offered at once, the peer with the greater id keeps
    /// its own offer and the other one answers.
    fn negotiate_connection(
        &self,
        table: &mut RoutingTable,
        message: &Message,
        negotiation: &ConnectionNegotiation,
    ) -> MeshResult<()> {
        let remote = message.sender();
        match negotiation.kind {
            NegotiationType::Offer => {
                let existing = table.connection(remote).map(Connection::state);
                match existing {
                    Some(ConnectionState::Open) => {
                        debug!(%remote, "ignoring offer for open connection");
                        return Ok(());
                    }
                    Some(ConnectionState::Opening) if table.my_id() > remote.peer_id() => {
                        debug!(%remote, "keeping own offer over colliding one");
                        return Ok(());
                    }
                    Some(_) => {
                        debug!(%remote, "yielding to colliding offer");
                        table.discard_connection(remote);
                    }
                    None => {}
                }
                table.connect_to(remote.clone(), ConnectionOptions::answering(negotiation.clone()))?;
                Ok(())
            }
            NegotiationType::Answer => table.negotiate(remote, negotiation),
            NegotiationType::Rejection => {
                Err(ProtocolError::UnsupportedNegotiation(negotiation.kind.to_string()).into())
            }
        }
    }
}
