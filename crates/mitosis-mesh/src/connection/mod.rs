//! Connection state machine.
//!
//! ```text
//! CLOSED --open()--> OPENING --opened--> OPEN --close()--> CLOSING --closed--> CLOSED
//!                       |                  |
//!                       +------error-------+--> ERROR --> CLOSED
//! ```
//!
//! A [`Connection`] is either backed by a physical [`Link`] or is a logical
//! VIA relay through a directly connected peer. VIA connections have no link:
//! opening and closing them completes immediately.

mod meter;
mod table;

pub use meter::ConnectionMeter;
pub use table::{ConnectionTable, ConnectionView};

use crate::transport::{ConnectionOptions, Link};
use mitosis_core::{
    Address, ConnectionError, ConnectionNegotiation, MeshResult, Message, Subject,
};
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves a pending connect with the remote peer id.
pub(crate) type Waiter = oneshot::Sender<MeshResult<String>>;

#[derive(Debug)]
enum ConnectionKind {
    Direct(Box<dyn Link>),
    Via { quality: f64 },
}

#[derive(Debug)]
pub struct Connection {
    address: Address,
    kind: ConnectionKind,
    state: ConnectionState,
    options: ConnectionOptions,
    meter: ConnectionMeter,
    waiters: Vec<Waiter>,
    state_changes: Subject<ConnectionState>,
}

impl Connection {
    /// A closed connection over `link`.
    pub fn direct(address: Address, link: Box<dyn Link>, options: ConnectionOptions, now_ms: u64) -> Self {
        Self::with_kind(address, ConnectionKind::Direct(link), options, now_ms)
    }

    /// A closed logical relay. Its quality is the advertised one, or
    /// `default_quality` when none was advertised.
    pub fn via(address: Address, options: ConnectionOptions, default_quality: f64, now_ms: u64) -> Self {
        let quality = options.quality.unwrap_or(default_quality).clamp(0.0, 1.0);
        Self::with_kind(address, ConnectionKind::Via { quality }, options, now_ms)
    }

    /// An already open connection accepted from a remote endpoint.
    pub fn accepted(address: Address, link: Box<dyn Link>, now_ms: u64) -> Self {
        let mut connection = Self::direct(address, link, ConnectionOptions::default(), now_ms);
        connection.state = ConnectionState::Open;
        connection
    }

    fn with_kind(address: Address, kind: ConnectionKind, options: ConnectionOptions, now_ms: u64) -> Self {
        Self {
            address,
            kind,
            state: ConnectionState::Closed,
            options,
            meter: ConnectionMeter::new(now_ms),
            waiters: Vec::new(),
            state_changes: Subject::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.kind, ConnectionKind::Direct(_))
    }

    pub fn is_via(&self) -> bool {
        matches!(self.kind, ConnectionKind::Via { .. })
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Link quality for direct connections, advertised quality for VIA.
    pub fn quality(&self) -> f64 {
        match &self.kind {
            ConnectionKind::Direct(link) => link.quality().clamp(0.0, 1.0),
            ConnectionKind::Via { quality } => *quality,
        }
    }

    /// Replace the advertised quality of a VIA connection.
    pub fn set_via_quality(&mut self, value: f64) {
        if let ConnectionKind::Via { quality } = &mut self.kind {
            *quality = value.clamp(0.0, 1.0);
        }
    }

    pub fn meter(&self) -> &ConnectionMeter {
        &self.meter
    }

    pub fn meter_mut(&mut self) -> &mut ConnectionMeter {
        &mut self.meter
    }

    /// Stream of state transitions; completes when the connection closes.
    pub fn observe_state_change(&mut self) -> mpsc::UnboundedReceiver<ConnectionState> {
        self.state_changes.subscribe()
    }

    /// Resolve `waiter` once the connection is open. Resolves immediately
    /// when it already is.
    pub(crate) fn add_waiter(&mut self, waiter: Waiter) {
        if self.state == ConnectionState::Open {
            let _ = waiter.send(Ok(self.address.peer_id().to_string()));
        } else {
            self.waiters.push(waiter);
        }
    }

    /// Start opening. Only legal from CLOSED. A VIA connection is open when
    /// this returns; a direct one waits for its link.
    pub fn open(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Closed {
            return Err(ConnectionError::Transport {
                address: self.address.to_string(),
                reason: format!("cannot open from state {}", self.state),
            });
        }
        self.transition(ConnectionState::Opening);
        let result = match &mut self.kind {
            ConnectionKind::Direct(link) => link.open(&self.options),
            ConnectionKind::Via { .. } => Ok(()),
        };
        match result {
            Ok(()) if self.is_via() => {
                self.on_open();
                Ok(())
            }
            Ok(()) => Ok(()),
            Err(err) => {
                self.on_error(err.clone());
                Err(err)
            }
        }
    }

    /// The link reported it is open. Returns `true` on the OPENING -> OPEN
    /// transition.
    pub fn on_open(&mut self) -> bool {
        if self.state != ConnectionState::Opening {
            trace!(address = %self.address, state = %self.state, "ignoring open notification");
            return false;
        }
        self.transition(ConnectionState::Open);
        let peer_id = self.address.peer_id().to_string();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(peer_id.clone()));
        }
        true
    }

    /// Begin an orderly close. A VIA connection is CLOSED when this returns.
    pub fn close(&mut self) {
        match self.state {
            ConnectionState::Opening | ConnectionState::Open => {}
            _ => return,
        }
        self.transition(ConnectionState::Closing);
        match &mut self.kind {
            ConnectionKind::Direct(link) => link.close(),
            ConnectionKind::Via { .. } => {
                self.on_close(None);
            }
        }
    }

    /// Terminal transition. Pending waiters are rejected with `reason`, or
    /// with [`ConnectionError::Closed`]. Returns `false` if already closed.
    pub fn on_close(&mut self, reason: Option<ConnectionError>) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        let reason = reason.unwrap_or_else(|| ConnectionError::Closed(self.address.to_string()));
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(reason.clone().into()));
        }
        self.transition(ConnectionState::Closed);
        self.state_changes.close();
        true
    }

    /// The link failed; passes through ERROR and ends CLOSED.
    pub fn on_error(&mut self, reason: ConnectionError) {
        if self.state == ConnectionState::Closed {
            return;
        }
        debug!(address = %self.address, %reason, "connection failed");
        self.transition(ConnectionState::Error);
        self.on_close(Some(reason));
    }

    /// Hand `message` to the link. Only legal while OPEN; VIA connections
    /// are resolved to their location's link by the routing table.
    pub fn send(&mut self, message: &Message) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::NotOpen(self.address.to_string()));
        }
        match &mut self.kind {
            ConnectionKind::Direct(link) => link.send(message),
            ConnectionKind::Via { .. } => Err(ConnectionError::Transport {
                address: self.address.to_string(),
                reason: "via connections relay through their location".into(),
            }),
        }
    }

    /// Feed a handshake answer to an opening direct connection.
    pub fn negotiate(&mut self, negotiation: &ConnectionNegotiation) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Opening {
            return Err(ConnectionError::NotOpen(self.address.to_string()));
        }
        match &mut self.kind {
            ConnectionKind::Direct(link) => link.negotiate(negotiation).map_err(|err| match err {
                ConnectionError::NegotiationUnsupported(_) => {
                    ConnectionError::NegotiationUnsupported(self.address.to_string())
                }
                other => other,
            }),
            ConnectionKind::Via { .. } => {
                Err(ConnectionError::NegotiationUnsupported(self.address.to_string()))
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!(address = %self.address, from = %self.state, to = %next, "connection state");
        self.state = next;
        self.state_changes.publish(next);
    }
}
