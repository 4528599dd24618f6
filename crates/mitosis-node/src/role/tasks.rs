//! Topology tasks shared by several roles.

use mitosis_core::{Address, Message, PeerUpdateEntry, RoleType};
use mitosis_mesh::{ConnectionOptions, RemotePeer};
use ordered_float::OrderedFloat;
use tracing::{debug, info};

use super::{Role, behaviour};
use crate::node::MeshNode;

/// Send `receiver` a PEER_UPDATE advertising `peer_ids` as known to this
/// node. Ids missing from the routing table are skipped.
pub fn send_peer_update(node: &mut MeshNode, receiver: &str, peer_ids: &[String]) {
    let table = node.routing_table();
    let entries: Vec<PeerUpdateEntry> = peer_ids
        .iter()
        .filter_map(|id| {
            let peer = table.get_peer_by_id(id)?;
            let meter = table.meter(id)?;
            Some(PeerUpdateEntry {
                peer_id: id.clone(),
                roles: peer.roles().iter().copied().collect(),
                quality: meter.peer_update_quality(),
            })
        })
        .collect();

    let update = Message::peer_update(node.my_address(), node.address_of(receiver), entries);
    if let Err(err) = node.send_message(&update) {
        debug!(peer = %receiver, %err, "peer update not sent");
    }
}

/// Tell every direct neighbour which peers this node reaches directly.
/// Signals are never advertised.
pub fn gossip_peer_updates(node: &mut MeshNode) {
    let table = node.routing_table();
    let neighbours: Vec<String> = table
        .peers()
        .filter(|p| p.best_direct_connection().is_some())
        .map(|p| p.id().to_string())
        .collect();
    let advertised: Vec<String> = table
        .peers()
        .filter(|p| p.best_direct_connection().is_some() && !p.has_role(RoleType::Signal))
        .map(|p| p.id().to_string())
        .collect();

    for neighbour in &neighbours {
        send_peer_update(node, neighbour, &advertised);
    }
}

/// Announce live, locally sourced channels to every directly connected
/// `Peer`.
pub fn publish_channel_announcement(node: &mut MeshNode) {
    let announcements = node.channels().announcements(node.my_id());
    if announcements.is_empty() {
        return;
    }
    let receivers: Vec<String> = node
        .routing_table()
        .peers()
        .filter(|p| p.has_role(RoleType::Peer) && p.best_direct_connection().is_some())
        .map(|p| p.id().to_string())
        .collect();

    for receiver in receivers {
        let message = Message::channel_announcement(
            node.my_address(),
            node.address_of(&receiver),
            announcements.clone(),
        );
        if let Err(err) = node.send_message(&message) {
            debug!(peer = %receiver, %err, "channel announcement not sent");
        }
    }
}

/// Whether `peer` is known to this node only as a bootstrap signal.
pub(crate) fn is_signal_only(peer: &RemotePeer) -> bool {
    peer.has_role(RoleType::Signal) && peer.roles().len() == 1
}

/// Keep the number of direct peers within the goals of the node's roles.
/// Peers known only as signals do not count towards the goals.
///
/// Below `direct_connections_goal_min` the node connects to the best
/// candidates it reaches indirectly until `direct_connections_goal_max`
/// would be met. Above `direct_connections_max` it drops the lowest-quality
/// unprotected direct peers.
pub fn satisfy_connection_goal(node: &mut MeshNode) {
    let goals = node.effective_goals();
    let count = node
        .routing_table()
        .peers()
        .filter(|p| p.has_live_direct_connection() && !is_signal_only(p))
        .count();

    if count < goals.direct_connections_goal_min {
        let wanted = goals.direct_connections_goal_max.saturating_sub(count);
        let protocol = node.config().default_direct_protocol;
        for peer in acquisition_candidates(node).into_iter().take(wanted) {
            let address = Address::direct(&peer, protocol);
            match node.connect_to(address.clone(), ConnectionOptions::default()) {
                Ok(_) => debug!(%address, "connecting towards goal"),
                Err(err) => debug!(%address, %err, "candidate not connectable"),
            }
        }
    } else if count > goals.direct_connections_max {
        let excess = count - goals.direct_connections_max;
        for peer in prune_candidates(node).into_iter().take(excess) {
            info!(%peer, "dropping direct peer above connection maximum");
            close_direct_connections(node, &peer);
        }
    }
}

/// Once the goal minimum is met by peers some role requires, close direct
/// connections to every peer no role requires.
pub fn release_unrequired_peers(node: &mut MeshNode) {
    let roles: Vec<&dyn Role> = node.roles().iter().map(|r| behaviour(*r)).collect();
    let required = |peer: &RemotePeer| roles.iter().any(|role| role.requires_peer(peer));
    let table = node.routing_table();

    let required_open = table
        .peers()
        .filter(|p| p.best_direct_connection().is_some() && required(p))
        .count();
    if required_open < node.effective_goals().direct_connections_goal_min {
        return;
    }
    let unrequired: Vec<String> = table
        .peers()
        .filter(|p| p.has_live_direct_connection() && !required(p))
        .map(|p| p.id().to_string())
        .collect();

    for peer in unrequired {
        info!(%peer, "releasing unrequired peer");
        close_direct_connections(node, &peer);
    }
}

/// Peers reachable only indirectly, best acquisition quality first.
fn acquisition_candidates(node: &MeshNode) -> Vec<String> {
    let table = node.routing_table();
    let mut candidates: Vec<(OrderedFloat<f64>, String)> = table
        .peers()
        .filter(|p| {
            !p.has_direct_connection()
                && !p.has_role(RoleType::Signal)
                && p.best_open_connection().is_some()
        })
        .filter_map(|p| {
            let meter = table.meter(p.id())?;
            Some((OrderedFloat(meter.acquisition_quality()), p.id().to_string()))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    candidates.into_iter().map(|(_, id)| id).collect()
}

/// Unprotected direct peers other than signals, lowest quality first.
fn prune_candidates(node: &MeshNode) -> Vec<String> {
    let table = node.routing_table();
    let mut candidates: Vec<(OrderedFloat<f64>, String)> = table
        .peers()
        .filter(|p| p.has_live_direct_connection() && !is_signal_only(p))
        .filter(|p| !p.connection_table().iter().any(|c| c.meter().is_protected()))
        .filter_map(|p| {
            let meter = table.meter(p.id())?;
            Some((OrderedFloat(meter.quality()), p.id().to_string()))
        })
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    candidates.into_iter().map(|(_, id)| id).collect()
}

fn close_direct_connections(node: &mut MeshNode, peer_id: &str) {
    let addresses = match node.routing_table().get_peer_by_id(peer_id) {
        Some(peer) => peer.connection_table().view().filter_direct().addresses(),
        None => return,
    };
    let table = node.routing_table_mut();
    for address in &addresses {
        table.close_connection(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, node_with, pump, ws};
    use mitosis_core::{ManualClock, MeshConfig, RoleConfig};
    use mitosis_mesh::LoopbackNetwork;

    fn peer_goals(min: usize, goal_max: usize, max: usize) -> MeshConfig {
        MeshConfig {
            peer: RoleConfig {
                direct_connections_goal_min: min,
                direct_connections_goal_max: goal_max,
                direct_connections_max: max,
                max_routers_per_signal: 0,
            },
            ..MeshConfig::default()
        }
    }

    // ------------------------------------------------------------------
    // Releasing peers
    // ------------------------------------------------------------------

    #[test]
    fn graduated_peer_lets_go_of_the_signal() {
        let network = LoopbackNetwork::new();
        let clock = ManualClock::new(0);
        let mut p = node_with(&network, "p", &[RoleType::Peer], peer_goals(1, 5, 10), clock);
        let mut s = node(&network, "s", &[RoleType::Signal]);
        let mut q = node(&network, "q", &[RoleType::Peer]);

        p.connect_to_signal(ws("s")).unwrap();
        p.connect_to(ws("q"), ConnectionOptions::with_roles(vec![RoleType::Peer]))
            .unwrap();
        pump(&mut [&mut p, &mut s, &mut q]);

        p.tick();
        pump(&mut [&mut p, &mut s, &mut q]);

        assert!(p.routing_table().get_peer_by_id("s").is_none());
        assert!(p.routing_table().get_peer_by_id("q").is_some());
        assert!(s.routing_table().get_peer_by_id("p").is_none());
    }

    #[test]
    fn peer_below_goal_keeps_the_signal() {
        let network = LoopbackNetwork::new();
        let mut p = node(&network, "p", &[RoleType::Peer]);
        let mut s = node(&network, "s", &[RoleType::Signal]);

        p.connect_to_signal(ws("s")).unwrap();
        pump(&mut [&mut p, &mut s]);
        p.tick();
        pump(&mut [&mut p, &mut s]);

        assert!(p.routing_table().get_peer_by_id("s").is_some());
    }

    #[test]
    fn newbie_keeps_only_signals() {
        let network = LoopbackNetwork::new();
        let mut n = node(&network, "n", &[RoleType::Newbie]);
        let mut s = node(&network, "s", &[RoleType::Signal]);
        let mut q = node(&network, "q", &[RoleType::Peer]);

        n.connect_to_signal(ws("s")).unwrap();
        n.connect_to(ws("q"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut n, &mut s, &mut q]);
        release_unrequired_peers(&mut n);
        pump(&mut [&mut n, &mut s, &mut q]);

        assert!(n.routing_table().get_peer_by_id("s").is_some());
        assert!(n.routing_table().get_peer_by_id("q").is_none());
    }

    // ------------------------------------------------------------------
    // Connection goal
    // ------------------------------------------------------------------

    #[test]
    fn excess_unprotected_peers_are_dropped_lowest_first() {
        let network = LoopbackNetwork::new();
        let clock = ManualClock::new(0);
        let mut p = node_with(&network, "p", &[RoleType::Peer], peer_goals(0, 1, 1), clock.clone());
        let mut q1 = node(&network, "q1", &[RoleType::Peer]);
        let mut q2 = node(&network, "q2", &[RoleType::Peer]);

        p.connect_to(ws("q1"), ConnectionOptions::default()).unwrap();
        p.connect_to(ws("q2"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut p, &mut q1, &mut q2]);

        // Still protected: nothing is dropped.
        satisfy_connection_goal(&mut p);
        pump(&mut [&mut p, &mut q1, &mut q2]);
        assert_eq!(p.routing_table().direct_peer_ids().len(), 2);

        clock.advance(p.config().protection_time_ms + 1);
        p.routing_table_mut().fire_due_timers();
        satisfy_connection_goal(&mut p);
        pump(&mut [&mut p, &mut q1, &mut q2]);

        assert_eq!(p.routing_table().direct_peer_ids(), vec!["q2".to_string()]);
    }

    #[test]
    fn signals_do_not_count_towards_the_goal() {
        let network = LoopbackNetwork::new();
        let clock = ManualClock::new(0);
        let mut p = node_with(&network, "p", &[RoleType::Peer], peer_goals(1, 5, 10), clock);
        let mut s = node(&network, "s", &[RoleType::Signal]);
        p.connect_to_signal(ws("s")).unwrap();
        pump(&mut [&mut p, &mut s]);
        p.connect_to(Address::via("x", "s"), ConnectionOptions::with_quality(0.8))
            .unwrap();

        satisfy_connection_goal(&mut p);

        let rtc = Address::direct("x", p.config().default_direct_protocol);
        assert!(p.routing_table().connection(&rtc).is_some());
    }

    #[test]
    fn signals_are_never_acquisition_candidates() {
        let network = LoopbackNetwork::new();
        let mut p = node(&network, "p", &[RoleType::Peer]);
        let mut r = node(&network, "r", &[RoleType::Router]);
        p.connect_to(ws("r"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut p, &mut r]);

        p.connect_to(Address::via("x", "r"), ConnectionOptions::with_quality(0.9))
            .unwrap();
        p.connect_to(
            Address::via("sig", "r"),
            ConnectionOptions {
                quality: Some(0.9),
                roles: vec![RoleType::Signal],
                negotiation: None,
            },
        )
        .unwrap();

        assert_eq!(acquisition_candidates(&p), vec!["x".to_string()]);
    }

    #[test]
    fn better_candidates_come_first() {
        let network = LoopbackNetwork::new();
        let mut p = node(&network, "p", &[RoleType::Peer]);
        let mut r = node(&network, "r", &[RoleType::Router]);
        p.connect_to(ws("r"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut p, &mut r]);

        p.connect_to(Address::via("weak", "r"), ConnectionOptions::with_quality(0.2))
            .unwrap();
        p.connect_to(Address::via("strong", "r"), ConnectionOptions::with_quality(0.9))
            .unwrap();

        assert_eq!(
            acquisition_candidates(&p),
            vec!["strong".to_string(), "weak".to_string()]
        );
    }

    // ------------------------------------------------------------------
    // Announcements
    // ------------------------------------------------------------------

    #[test]
    fn channel_announcements_reach_direct_peers() {
        use mitosis_core::MessageBody;
        use mitosis_mesh::{Channel, ChannelProvider};

        let network = LoopbackNetwork::new();
        let mut p = node(&network, "p", &[RoleType::Peer]);
        let mut q = node(&network, "q", &[RoleType::Peer]);
        let mut announced = q.observe_channel_announcements();

        p.connect_to(ws("q"), ConnectionOptions::with_roles(vec![RoleType::Peer]))
            .unwrap();
        pump(&mut [&mut p, &mut q]);

        let mut channel = Channel::new("talk");
        channel.add_provider(ChannelProvider::source("p", 2));
        p.channels_mut().insert(channel);
        p.channels_mut().set_capacity(6);
        publish_channel_announcement(&mut p);
        pump(&mut [&mut p, &mut q]);

        let message = announced.try_recv().unwrap();
        let MessageBody::ChannelAnnouncement(entries) = message.body() else {
            panic!("expected a channel announcement");
        };
        assert_eq!(entries[0].channel_id, "talk");
        assert_eq!(entries[0].providers[0].capacity, 6);
    }

    #[test]
    fn gossip_skips_signals() {
        use mitosis_core::MessageBody;

        let network = LoopbackNetwork::new();
        let mut p = node(&network, "p", &[RoleType::Peer]);
        let mut q = node(&network, "q", &[RoleType::Peer]);
        let mut s = node(&network, "s", &[RoleType::Signal]);
        let mut seen = q.observe_messages();

        p.connect_to_signal(ws("s")).unwrap();
        p.connect_to(ws("q"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut p, &mut q, &mut s]);

        gossip_peer_updates(&mut p);
        pump(&mut [&mut p, &mut q, &mut s]);

        let update = seen.try_recv().unwrap();
        let MessageBody::PeerUpdate(entries) = update.body() else {
            panic!("expected a peer update");
        };
        let ids: Vec<&str> = entries.iter().map(|e| e.peer_id.as_str()).collect();
        assert_eq!(ids, vec!["q"]);
    }
}
