//! # mitosis-mesh — the overlay's control plane.
//!
//! - [`routing_table::RoutingTable`] — authoritative registry of remote peers,
//!   sole owner of peer and connection lifetime, emitter of churn events
//! - [`connection::Connection`] — state machine over one transport link or
//!   one logical VIA relay, with its [`connection::ConnectionMeter`]
//! - [`metering::RemotePeerMeter`] — composite quality, saturation and
//!   trust scores that drive routing and admission
//! - [`broker::MessageBroker`] — classifies, dispatches and forwards every
//!   message that reaches the node
//! - [`role_manager::RoleManager`] — the node's active role set
//! - [`transport`] — the seam to concrete transports; [`loopback`] is an
//!   in-process implementation
//! - [`channel`] — locally known media channels and their announcements

pub mod broker;
pub mod channel;
pub mod connection;
pub mod loopback;
pub mod metering;
pub mod peer;
pub mod role_manager;
pub mod routing_table;
pub mod transport;

#[cfg(test)]
mod testing;

pub use broker::{Delivery, MessageBroker};
pub use channel::{Channel, ChannelProvider, ChannelTable};
pub use connection::{Connection, ConnectionMeter, ConnectionState, ConnectionTable, ConnectionView};
pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use metering::{RemotePeerMeter, RouterAliveHighscore};
pub use peer::{ChurnType, ConnectionChurn, RemotePeer};
pub use role_manager::RoleManager;
pub use routing_table::{PeerChurn, PendingConnect, RoutingTable, TimerEvent};
pub use transport::{ConnectionEvent, ConnectionEventKind, ConnectionOptions, EventSink, Link, Transport};
