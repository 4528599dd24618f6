//! Error types for the Mitosis mesh.
//!
//! Protocol errors are fatal to the offending message only, connectivity
//! errors are recovered locally, and configuration errors surface at start-up.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported subject {0}")] UnsupportedSubject(String),
    #[error("unsupported connection negotiation type {0}")] UnsupportedNegotiation(String),
    #[error("{receiver} will not accept peer update from {sender} via {via}")] UnauthorizedPeerUpdate { receiver: String, sender: String, via: String },
    #[error("{receiver} will not accept role update from {sender}")] UnauthorizedRoleUpdate { receiver: String, sender: String },
    #[error("no pending negotiation for {0}")] NoPendingNegotiation(String),
    #[error("malformed message: {0}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection {0} not in open state")] NotOpen(String),
    #[error("opening {0} took too long")] OpenTimeout(String),
    #[error("transport error on {address}: {reason}")] Transport { address: String, reason: String },
    #[error("connection {0} closed")] Closed(String),
    #[error("connection {0} is closing")] Closing(String),
    #[error("no transport registered for protocol {0}")] UnsupportedProtocol(String),
    #[error("connection {0} does not support negotiation")] NegotiationUnsupported(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("peer not found: {0}")] PeerNotFound(String),
    #[error("all connections lost to {0}")] AllPathsLost(String),
    #[error("invalid address: {0}")] InvalidAddress(String),
    #[error("cannot connect to own address {0}")] SelfAddress(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{role}: goal min {min} exceeds goal max {max}")] GoalRange { role: String, min: usize, max: usize },
    #[error("{role}: goal max {goal_max} exceeds connection max {max}")] GoalAboveMax { role: String, goal_max: usize, max: usize },
    #[error("{role}: goal max must be non-zero")] ZeroGoalMax { role: String },
    #[error("{name} must be within [0, 1], got {value}")] QualityOutOfRange { name: String, value: f64 },
    #[error("{0} must be non-zero")] ZeroValue(String),
    #[error("default_direct_protocol must be a direct data protocol, got {0}")] NotDirectProtocol(String),
    #[error("failed to load configuration: {0}")] Load(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error(transparent)] Protocol(#[from] ProtocolError),
    #[error(transparent)] Connection(#[from] ConnectionError),
    #[error(transparent)] Routing(#[from] RoutingError),
    #[error(transparent)] Config(#[from] ConfigError),
}

/// Result alias used across the mesh crates.
pub type MeshResult<T> = Result<T, MeshError>;
