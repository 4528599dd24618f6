//! Routing targets.
//!
//! An [`Address`] names the ultimate peer, the transport [`Protocol`] used to
//! reach it and, for [`Protocol::Via`], the direct neighbour that relays on
//! its behalf. Addresses are immutable value objects compared by field tuple.

use crate::error::RoutingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// URI scheme used by the textual address form.
const SCHEME: &str = "mitosis://";

/// Transport kind of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    /// Secure websocket to a listening endpoint.
    #[serde(rename = "wss")]
    WebSocket,
    /// Plain websocket to a listening endpoint.
    #[serde(rename = "ws")]
    WebSocketUnsecure,
    /// Negotiated peer-to-peer data channel.
    #[serde(rename = "webrtc-data")]
    WebRtcData,
    /// Negotiated peer-to-peer media channel.
    #[serde(rename = "webrtc-stream")]
    WebRtcStream,
    /// Logical relay through the peer named by the address location.
    #[serde(rename = "via")]
    Via,
}

impl Protocol {
    /// Every protocol, in declaration order.
    pub const ALL: [Protocol; 5] = [
        Protocol::WebSocket,
        Protocol::WebSocketUnsecure,
        Protocol::WebRtcData,
        Protocol::WebRtcStream,
        Protocol::Via,
    ];

    /// Protocols backed by a physical transport.
    pub fn is_direct(&self) -> bool {
        !matches!(self, Protocol::Via)
    }

    /// Protocols whose connections contribute to the average quality score.
    pub fn is_measured(&self) -> bool {
        matches!(
            self,
            Protocol::WebSocket | Protocol::WebSocketUnsecure | Protocol::WebRtcData | Protocol::Via
        )
    }

    /// Direct protocols that carry mesh messages (media streams excluded).
    pub fn is_direct_data(&self) -> bool {
        matches!(
            self,
            Protocol::WebSocket | Protocol::WebSocketUnsecure | Protocol::WebRtcData
        )
    }

    /// Short textual tag used in address strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::WebSocket => "wss",
            Protocol::WebSocketUnsecure => "ws",
            Protocol::WebRtcData => "webrtc-data",
            Protocol::WebRtcStream => "webrtc-stream",
            Protocol::Via => "via",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| RoutingError::InvalidAddress(format!("unknown protocol '{s}'")))
    }
}

/// Identifies a routing target: `(peer_id, protocol, location)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    peer_id: String,
    protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl Address {
    /// Build an address from its parts without validation.
    pub fn new(peer_id: impl Into<String>, protocol: Protocol, location: Option<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            protocol,
            location,
        }
    }

    /// Address of a direct (physical transport) connection.
    pub fn direct(peer_id: impl Into<String>, protocol: Protocol) -> Self {
        Self::new(peer_id, protocol, None)
    }

    /// Address meaning "reach `peer_id` through the direct peer `location`".
    pub fn via(peer_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self::new(peer_id, Protocol::Via, Some(location.into()))
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn is_via(&self) -> bool {
        self.protocol == Protocol::Via
    }

    pub fn is_direct(&self) -> bool {
        self.protocol.is_direct()
    }

    /// The `(protocol, location)` pair that must be unique within one peer's
    /// connection table.
    pub fn connection_key(&self) -> (Protocol, Option<&str>) {
        (self.protocol, self.location())
    }

    /// Check the structural rules of a connection address: VIA addresses
    /// carry a non-empty location that is not the target itself, direct
    /// addresses carry none.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.peer_id.is_empty() {
            return Err(RoutingError::InvalidAddress(format!("{self}: empty peer id")));
        }
        match (self.protocol, self.location()) {
            (Protocol::Via, None) | (Protocol::Via, Some("")) => Err(RoutingError::InvalidAddress(
                format!("{self}: via address without location"),
            )),
            (Protocol::Via, Some(location)) if location == self.peer_id => Err(
                RoutingError::InvalidAddress(format!("{self}: peer cannot relay to itself")),
            ),
            (Protocol::Via, Some(_)) => Ok(()),
            (_, Some(_)) => Err(RoutingError::InvalidAddress(format!(
                "{self}: direct address must not carry a location"
            ))),
            (_, None) => Ok(()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.peer_id, self.protocol)?;
        if let Some(location) = &self.location {
            write!(f, "/{location}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| RoutingError::InvalidAddress(format!("missing scheme in '{s}'")))?;
        let mut parts = rest.splitn(3, '/');
        let peer_id = parts.next().unwrap_or_default();
        let protocol = parts
            .next()
            .ok_or_else(|| RoutingError::InvalidAddress(format!("missing protocol in '{s}'")))?
            .parse::<Protocol>()?;
        let location = parts.next().map(str::to_owned);
        let address = Address::new(peer_id, protocol, location);
        address.validate()?;
        Ok(address)
    }
}
