//! Seam between the control plane and concrete transports.
//!
//! A [`Transport`] is registered per [`Protocol`] on the routing table and
//! creates one [`Link`] per outbound connection. Links never call back into
//! the mesh: they report asynchronously by pushing [`ConnectionEvent`]s into
//! the node's [`EventSink`], which the node drains on its own event loop.
//!
//! [`Protocol`]: mitosis_core::Protocol

use mitosis_core::{Address, ConnectionError, ConnectionNegotiation, Message, RoleType};
use std::fmt;
use tokio::sync::mpsc;

/// Sending half of a node's inbox.
pub type EventSink = mpsc::UnboundedSender<ConnectionEvent>;

/// Parameters attached to a connection when it is requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionOptions {
    /// Handshake payload received from the remote side; present when this
    /// connection answers an offer.
    pub negotiation: Option<ConnectionNegotiation>,
    /// Quality advertised for a VIA path.
    pub quality: Option<f64>,
    /// Roles the remote peer is known to hold.
    pub roles: Vec<RoleType>,
}

impl ConnectionOptions {
    /// Options for a VIA path advertised with `quality`.
    pub fn with_quality(quality: f64) -> Self {
        Self {
            quality: Some(quality),
            ..Self::default()
        }
    }

    /// Options for a connection answering `negotiation`.
    pub fn answering(negotiation: ConnectionNegotiation) -> Self {
        Self {
            negotiation: Some(negotiation),
            ..Self::default()
        }
    }

    /// Options tagging the remote peer with `roles`.
    pub fn with_roles(roles: Vec<RoleType>) -> Self {
        Self {
            roles,
            ..Self::default()
        }
    }
}

/// What a transport observed on one connection.
#[derive(Debug)]
pub enum ConnectionEventKind {
    /// The link finished opening.
    Opened,
    /// The link closed, locally or remotely.
    Closed,
    /// The link failed.
    Error(String),
    /// A message arrived on the link.
    Message(Message),
    /// A locally originated handshake step the link needs routed to the
    /// remote end through the mesh.
    Relay(Message),
    /// A remote endpoint connected to us; the link is already open.
    Incoming(Box<dyn Link>),
}

/// Event pushed by a transport, addressed by the connection address as seen
/// from the receiving node.
#[derive(Debug)]
pub struct ConnectionEvent {
    pub address: Address,
    pub kind: ConnectionEventKind,
}

impl ConnectionEvent {
    pub fn new(address: Address, kind: ConnectionEventKind) -> Self {
        Self { address, kind }
    }
}

/// One physical transport link.
pub trait Link: Send + fmt::Debug {
    /// Begin opening. Completion is reported with [`ConnectionEventKind::Opened`].
    fn open(&mut self, options: &ConnectionOptions) -> Result<(), ConnectionError>;

    /// Begin closing. Completion is reported with [`ConnectionEventKind::Closed`].
    fn close(&mut self);

    /// Hand a message to the transport.
    fn send(&mut self, message: &Message) -> Result<(), ConnectionError>;

    /// Feed the remote side's handshake answer to a link that is opening.
    fn negotiate(&mut self, negotiation: &ConnectionNegotiation) -> Result<(), ConnectionError> {
        Err(ConnectionError::NegotiationUnsupported(negotiation.kind.to_string()))
    }

    /// Measured link quality in `[0, 1]`.
    fn quality(&self) -> f64 {
        1.0
    }
}

/// Factory for links of one protocol.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Create a closed link from `local_id` towards `address`. Events for
    /// the link must be pushed into `sink`.
    fn connect(
        &self,
        local_id: &str,
        address: &Address,
        sink: EventSink,
    ) -> Result<Box<dyn Link>, ConnectionError>;
}
