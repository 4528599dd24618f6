//! # mitosis-node — Mesh node: event loop, roles, configuration.
//!
//! Composes the control plane into a running mesh node:
//! - [`node::MeshNode`] — owns the routing table, broker and role set, and
//!   serializes every event through one loop
//! - [`role`] — the newbie, signal, router and peer behaviours and the
//!   topology tasks they share
//! - [`config::NodeConfig`] — node identity, bootstrap signal and mesh
//!   constants, loaded from file and environment

pub mod config;
pub mod node;
pub mod role;

#[cfg(test)]
mod testing;

pub use config::NodeConfig;
pub use node::{MeshNode, NodeSummary};
pub use role::Role;
