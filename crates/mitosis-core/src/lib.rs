//! # mitosis-core
//! Foundation types and contracts for the Mitosis mesh overlay.
//!
//! - [`address`] — routing targets and transport protocols
//! - [`message`] — immutable mesh messages and their typed bodies
//! - [`role`] — cooperative roles a node can enact
//! - [`config`] — per-role connection goals and metering constants
//! - [`clock`] — time source and timer queue consumed by the control plane
//! - [`subject`] — multicast, replay-free observation channels
//! - [`error`] — error taxonomy shared by every crate

pub mod address;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod role;
pub mod subject;

pub use address::{Address, Protocol};
pub use clock::{Clock, ManualClock, SystemClock, TimerId, TimerQueue};
pub use config::{MeshConfig, RoleConfig};
pub use error::{ConfigError, ConnectionError, MeshError, MeshResult, ProtocolError, RoutingError};
pub use message::{
    ChannelAnnouncementEntry, ChannelProviderEntry, ConnectionNegotiation, Message, MessageBody,
    MessageSubject, NegotiationType, PeerUpdateEntry,
};
pub use role::RoleType;
pub use subject::Subject;
