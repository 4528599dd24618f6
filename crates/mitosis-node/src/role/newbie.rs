use mitosis_core::{Message, RoleType};
use mitosis_mesh::RemotePeer;
use tracing::debug;

use super::Role;
use crate::node::MeshNode;

/// A node that has not been onboarded yet. It introduces itself to every
/// signal it is connected to until one grants it a role.
#[derive(Debug, Clone, Copy, Default)]
pub struct Newbie;

impl Role for Newbie {
    fn role_type(&self) -> RoleType {
        RoleType::Newbie
    }

    fn on_tick(&self, node: &mut MeshNode) {
        let signals: Vec<String> = node
            .routing_table()
            .peers()
            .filter(|p| p.has_role(RoleType::Signal) && p.best_open_connection().is_some())
            .map(|p| p.id().to_string())
            .collect();
        for signal in signals {
            let introduction = Message::introduction(node.my_address(), node.address_of(&signal));
            if let Err(err) = node.send_message(&introduction) {
                debug!(%signal, %err, "introduction not sent");
            }
        }
    }

    fn requires_peer(&self, peer: &RemotePeer) -> bool {
        peer.has_role(RoleType::Signal)
    }
}
