//! Multi-node scenario suite for the Mitosis mesh.
//!
//! Every test here wires several [`mitosis_node_lib::MeshNode`]s onto one
//! in-process loopback network under a shared virtual clock and drives them
//! tick by tick. Nothing touches a real socket or the wall clock.

pub mod helpers;
