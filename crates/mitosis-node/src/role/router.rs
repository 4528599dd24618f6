use mitosis_core::RoleType;
use mitosis_mesh::RemotePeer;

use super::Role;

/// Relays traffic between its neighbours. Forwarding itself is done by the
/// broker for every node; holding the role keeps the node connected to
/// everyone it relays for, signals included, so that newly onboarded peers
/// can be pointed at it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Role for Router {
    fn role_type(&self) -> RoleType {
        RoleType::Router
    }

    fn requires_peer(&self, _peer: &RemotePeer) -> bool {
        true
    }

    fn maintains_connection_goal(&self) -> bool {
        true
    }
}
