use mitosis_core::RoleType;
use mitosis_mesh::RemotePeer;

use super::{Role, tasks};
use crate::node::MeshNode;

/// Regular mesh participant. Keeps its neighbours informed about the peers
/// it reaches directly and announces the channels it provides.
#[derive(Debug, Clone, Copy, Default)]
pub struct Peer;

impl Role for Peer {
    fn role_type(&self) -> RoleType {
        RoleType::Peer
    }

    fn on_tick(&self, node: &mut MeshNode) {
        let ticks = node.ticks();
        let config = node.config();
        let gossip_due = ticks % config.peer_update_interval_ticks == 0;
        let announcement_due = ticks % config.channel_announcement_interval_ticks == 0;

        if gossip_due {
            tasks::gossip_peer_updates(node);
        }
        if announcement_due {
            tasks::publish_channel_announcement(node);
        }
    }

    /// Anyone but a peer known only as a signal.
    fn requires_peer(&self, peer: &RemotePeer) -> bool {
        !tasks::is_signal_only(peer)
    }

    fn maintains_connection_goal(&self) -> bool {
        true
    }
}
