//! Mesh messages.
//!
//! A [`Message`] is immutable once built: a sender, a receiver and a typed
//! [`MessageBody`]. The subject tag is derived from the body variant, so a
//! subject and its payload can never disagree.
//!
//! Transports that move bytes use the JSON codec ([`Message::to_json`] /
//! [`Message::from_json`]). Unknown subject tags decode to
//! [`ProtocolError::UnsupportedSubject`].

use crate::address::Address;
use crate::error::ProtocolError;
use crate::role::RoleType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subject tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageSubject {
    Introduction,
    RoleUpdate,
    PeerUpdate,
    ConnectionNegotiation,
    ChannelAnnouncement,
    AppContent,
}

impl MessageSubject {
    pub const ALL: [MessageSubject; 6] = [
        MessageSubject::Introduction,
        MessageSubject::RoleUpdate,
        MessageSubject::PeerUpdate,
        MessageSubject::ConnectionNegotiation,
        MessageSubject::ChannelAnnouncement,
        MessageSubject::AppContent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageSubject::Introduction => "introduction",
            MessageSubject::RoleUpdate => "role-update",
            MessageSubject::PeerUpdate => "peer-update",
            MessageSubject::ConnectionNegotiation => "connection-negotiation",
            MessageSubject::ChannelAnnouncement => "channel-announcement",
            MessageSubject::AppContent => "app-content",
        }
    }
}

impl fmt::Display for MessageSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageSubject {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageSubject::ALL
            .into_iter()
            .find(|subject| subject.as_str() == s)
            .ok_or_else(|| ProtocolError::UnsupportedSubject(s.to_owned()))
    }
}

/// One advertised peer inside a PEER_UPDATE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerUpdateEntry {
    pub peer_id: String,
    pub roles: Vec<RoleType>,
    /// Advertised quality in `[0, 1]`.
    pub quality: f64,
}

/// Step of a connection handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationType {
    Offer,
    Answer,
    Rejection,
}

impl fmt::Display for NegotiationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationType::Offer => f.write_str("offer"),
            NegotiationType::Answer => f.write_str("answer"),
            NegotiationType::Rejection => f.write_str("rejection"),
        }
    }
}

/// Offer/answer payload exchanged while opening a negotiated connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionNegotiation {
    pub kind: NegotiationType,
    /// Opaque session description produced by the transport.
    pub sdp: String,
}

impl ConnectionNegotiation {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: NegotiationType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: NegotiationType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProviderEntry {
    pub peer_id: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAnnouncementEntry {
    pub channel_id: String,
    pub providers: Vec<ChannelProviderEntry>,
}

/// Typed payload of a message; the variant is the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subject", content = "payload", rename_all = "kebab-case")]
pub enum MessageBody {
    Introduction,
    RoleUpdate(Vec<RoleType>),
    PeerUpdate(Vec<PeerUpdateEntry>),
    ConnectionNegotiation(ConnectionNegotiation),
    ChannelAnnouncement(Vec<ChannelAnnouncementEntry>),
    /// Opaque application payload.
    AppContent(serde_json::Value),
}

impl MessageBody {
    pub fn subject(&self) -> MessageSubject {
        match self {
            MessageBody::Introduction => MessageSubject::Introduction,
            MessageBody::RoleUpdate(_) => MessageSubject::RoleUpdate,
            MessageBody::PeerUpdate(_) => MessageSubject::PeerUpdate,
            MessageBody::ConnectionNegotiation(_) => MessageSubject::ConnectionNegotiation,
            MessageBody::ChannelAnnouncement(_) => MessageSubject::ChannelAnnouncement,
            MessageBody::AppContent(_) => MessageSubject::AppContent,
        }
    }
}

/// An immutable mesh message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    sender: Address,
    receiver: Address,
    body: MessageBody,
}

impl Message {
    pub fn new(sender: Address, receiver: Address, body: MessageBody) -> Self {
        Self {
            sender,
            receiver,
            body,
        }
    }

    pub fn introduction(sender: Address, receiver: Address) -> Self {
        Self::new(sender, receiver, MessageBody::Introduction)
    }

    pub fn role_update(sender: Address, receiver: Address, roles: Vec<RoleType>) -> Self {
        Self::new(sender, receiver, MessageBody::RoleUpdate(roles))
    }

    pub fn peer_update(sender: Address, receiver: Address, entries: Vec<PeerUpdateEntry>) -> Self {
        Self::new(sender, receiver, MessageBody::PeerUpdate(entries))
    }

    pub fn negotiation(
        sender: Address,
        receiver: Address,
        negotiation: ConnectionNegotiation,
    ) -> Self {
        Self::new(sender, receiver, MessageBody::ConnectionNegotiation(negotiation))
    }

    pub fn channel_announcement(
        sender: Address,
        receiver: Address,
        announcements: Vec<ChannelAnnouncementEntry>,
    ) -> Self {
        Self::new(sender, receiver, MessageBody::ChannelAnnouncement(announcements))
    }

    pub fn app_content(sender: Address, receiver: Address, content: serde_json::Value) -> Self {
        Self::new(sender, receiver, MessageBody::AppContent(content))
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn receiver(&self) -> &Address {
        &self.receiver
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn subject(&self) -> MessageSubject {
        self.body.subject()
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Decode from JSON, reporting unknown subjects distinctly from
    /// otherwise malformed input.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| {
            let subject = serde_json::from_str::<serde_json::Value>(raw)
                .ok()
                .and_then(|value| {
                    value
                        .pointer("/body/subject")
                        .and_then(|s| s.as_str())
                        .map(str::to_owned)
                });
            match subject {
                Some(tag) if tag.parse::<MessageSubject>().is_err() => {
                    ProtocolError::UnsupportedSubject(tag)
                }
                _ => ProtocolError::Malformed(e.to_string()),
            }
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.subject(), self.sender, self.receiver)
    }
}
