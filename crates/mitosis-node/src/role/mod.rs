//! Role behaviours.
//!
//! Each [`RoleType`] maps to a stateless [`Role`] object. The node runs the
//! behaviour of every role it holds on each tick and for each message
//! delivered to it; roles act only through the node's routing table and
//! send path.

mod newbie;
mod peer;
mod router;
mod signal;
pub mod tasks;

use mitosis_core::{Message, RoleType};
use mitosis_mesh::RemotePeer;

use crate::node::MeshNode;

pub use newbie::Newbie;
pub use peer::Peer;
pub use router::Router;
pub use signal::Signal;

/// Behaviour of one role.
pub trait Role: Send + Sync {
    fn role_type(&self) -> RoleType;

    fn on_tick(&self, _node: &mut MeshNode) {}

    fn on_message(&self, _node: &mut MeshNode, _message: &Message) {}

    /// Whether this role needs a direct connection to `peer` to function.
    fn requires_peer(&self, peer: &RemotePeer) -> bool;

    /// Whether holding this role makes the node maintain its direct
    /// connection goal.
    fn maintains_connection_goal(&self) -> bool {
        false
    }
}

/// The behaviour implementing `role`.
pub fn behaviour(role: RoleType) -> &'static dyn Role {
    match role {
        RoleType::Newbie => &Newbie,
        RoleType::Signal => &Signal,
        RoleType::Router => &Router,
        RoleType::Peer => &Peer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaviours_match_their_role() {
        for role in RoleType::ALL {
            assert_eq!(behaviour(role).role_type(), role);
        }
    }

    #[test]
    fn newbies_do_not_chase_connection_goals() {
        assert!(!behaviour(RoleType::Newbie).maintains_connection_goal());
        assert!(behaviour(RoleType::Signal).maintains_connection_goal());
        assert!(behaviour(RoleType::Router).maintains_connection_goal());
        assert!(behaviour(RoleType::Peer).maintains_connection_goal());
    }
}
