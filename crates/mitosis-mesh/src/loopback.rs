//! In-process transport.
//!
//! Nodes sharing one [`LoopbackNetwork`] reach each other by peer id. The
//! websocket protocols behave like a listening endpoint: opening a link
//! announces it to the remote node as an incoming connection. The WebRTC
//! protocols are negotiated: the initiator emits an OFFER through its own
//! connection, which the mesh routes to the remote node; the remote answers
//! over the mesh and the link opens on both ends when the ANSWER arrives.

use crate::transport::{ConnectionEvent, ConnectionEventKind, ConnectionOptions, EventSink, Link, Transport};
use mitosis_core::{
    Address, ConnectionError, ConnectionNegotiation, Message, NegotiationType, Protocol,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Registry of node inboxes reachable over loopback links.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    endpoints: Arc<Mutex<HashMap<String, EventSink>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `peer_id` reachable; events for it go to `sink`.
    pub fn register(&self, peer_id: impl Into<String>, sink: EventSink) {
        self.endpoints.lock().insert(peer_id.into(), sink);
    }

    pub fn unregister(&self, peer_id: &str) {
        self.endpoints.lock().remove(peer_id);
    }

    pub fn is_registered(&self, peer_id: &str) -> bool {
        self.endpoints.lock().contains_key(peer_id)
    }

    /// A transport for `protocol` over this network.
    pub fn transport(&self, protocol: Protocol) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            network: self.clone(),
            protocol,
        })
    }

    fn deliver(&self, peer_id: &str, event: ConnectionEvent) -> Result<(), ConnectionError> {
        let address = event.address.to_string();
        let sink = self.endpoints.lock().get(peer_id).cloned();
        let Some(sink) = sink else {
            return Err(ConnectionError::Transport {
                address,
                reason: format!("no loopback endpoint for {peer_id}"),
            });
        };
        sink.send(event).map_err(|_| ConnectionError::Transport {
            address,
            reason: format!("loopback endpoint {peer_id} is gone"),
        })
    }
}

#[derive(Debug)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    protocol: Protocol,
}

impl Transport for LoopbackTransport {
    fn connect(
        &self,
        local_id: &str,
        address: &Address,
        sink: EventSink,
    ) -> Result<Box<dyn Link>, ConnectionError> {
        Ok(Box::new(LoopbackLink {
            network: self.network.clone(),
            local_id: local_id.to_string(),
            remote_id: address.peer_id().to_string(),
            protocol: self.protocol,
            local_sink: sink,
            phase: Phase::Idle,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Offered,
    Answered,
    Established,
    Closed,
}

#[derive(Debug)]
struct LoopbackLink {
    network: LoopbackNetwork,
    local_id: String,
    remote_id: String,
    protocol: Protocol,
    local_sink: EventSink,
    phase: Phase,
}

impl LoopbackLink {
    fn is_negotiated(&self) -> bool {
        matches!(self.protocol, Protocol::WebRtcData | Protocol::WebRtcStream)
    }

    /// This link as addressed in the local routing table.
    fn local_address(&self) -> Address {
        Address::direct(&self.remote_id, self.protocol)
    }

    /// This link as addressed in the remote routing table.
    fn remote_address(&self) -> Address {
        Address::direct(&self.local_id, self.protocol)
    }

    fn emit_local(&self, kind: ConnectionEventKind) -> Result<(), ConnectionError> {
        self.local_sink
            .send(ConnectionEvent::new(self.local_address(), kind))
            .map_err(|_| ConnectionError::Transport {
                address: self.local_address().to_string(),
                reason: "local inbox is gone".into(),
            })
    }

    fn emit_remote(&self, kind: ConnectionEventKind) -> Result<(), ConnectionError> {
        self.network
            .deliver(&self.remote_id, ConnectionEvent::new(self.remote_address(), kind))
    }

    /// Route a handshake step to the remote node through the mesh.
    fn emit_negotiation(&self, negotiation: ConnectionNegotiation) -> Result<(), ConnectionError> {
        let message = Message::negotiation(
            Address::direct(&self.local_id, self.protocol),
            Address::direct(&self.remote_id, self.protocol),
            negotiation,
        );
        self.emit_local(ConnectionEventKind::Relay(message))
    }

    /// The other end of a websocket link, handed to the remote node.
    fn mirrored(&self, remote_sink: EventSink) -> LoopbackLink {
        LoopbackLink {
            network: self.network.clone(),
            local_id: self.remote_id.clone(),
            remote_id: self.local_id.clone(),
            protocol: self.protocol,
            local_sink: remote_sink,
            phase: Phase::Established,
        }
    }
}

impl Link for LoopbackLink {
    fn open(&mut self, options: &ConnectionOptions) -> Result<(), ConnectionError> {
        if self.is_negotiated() {
            match &options.negotiation {
                None => {
                    self.phase = Phase::Offered;
                    let sdp = format!("offer {} -> {}", self.local_id, self.remote_id);
                    self.emit_negotiation(ConnectionNegotiation::offer(sdp))
                }
                Some(offer) if offer.kind == NegotiationType::Offer => {
                    self.phase = Phase::Answered;
                    let sdp = format!("answer {} -> {}", self.local_id, self.remote_id);
                    self.emit_negotiation(ConnectionNegotiation::answer(sdp))
                }
                Some(other) => Err(ConnectionError::Transport {
                    address: self.local_address().to_string(),
                    reason: format!("cannot open with a {} payload", other.kind),
                }),
            }
        } else {
            let remote_sink = self
                .network
                .endpoints
                .lock()
                .get(&self.remote_id)
                .cloned()
                .ok_or_else(|| ConnectionError::Transport {
                    address: self.local_address().to_string(),
                    reason: "no endpoint listening".into(),
                })?;
            let incoming = self.mirrored(remote_sink);
            self.emit_remote(ConnectionEventKind::Incoming(Box::new(incoming)))?;
            self.phase = Phase::Established;
            self.emit_local(ConnectionEventKind::Opened)
        }
    }

    fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        let established = self.phase == Phase::Established;
        self.phase = Phase::Closed;
        let _ = self.emit_local(ConnectionEventKind::Closed);
        if established {
            let _ = self.emit_remote(ConnectionEventKind::Closed);
        }
    }

    fn send(&mut self, message: &Message) -> Result<(), ConnectionError> {
        trace!(link = %self.local_address(), %message, "loopback send");
        self.emit_remote(ConnectionEventKind::Message(message.clone()))
    }

    fn negotiate(&mut self, negotiation: &ConnectionNegotiation) -> Result<(), ConnectionError> {
        if self.phase != Phase::Offered || negotiation.kind != NegotiationType::Answer {
            return Err(ConnectionError::Transport {
                address: self.local_address().to_string(),
                reason: format!("unexpected {} while {:?}", negotiation.kind, self.phase),
            });
        }
        self.phase = Phase::Established;
        self.emit_remote(ConnectionEventKind::Opened)?;
        self.emit_local(ConnectionEventKind::Opened)
    }
}
