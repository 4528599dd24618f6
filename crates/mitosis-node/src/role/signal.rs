use mitosis_core::{Message, MessageBody, RoleType};
use mitosis_mesh::RemotePeer;
use ordered_float::OrderedFloat;
use tracing::{debug, info};

use super::{Role, tasks};
use crate::node::MeshNode;

/// Bootstrap authority. Onboards newbies by granting them roles and hands
/// out the routers it knows so they can join the mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signal;

impl Signal {
    /// Routers with an open direct connection, best advertised quality
    /// first, capped at `max_routers_per_signal`.
    fn routers(node: &MeshNode) -> Vec<String> {
        let table = node.routing_table();
        let mut routers: Vec<(OrderedFloat<f64>, String)> = table
            .peers()
            .filter(|p| p.has_role(RoleType::Router) && p.best_direct_connection().is_some())
            .filter_map(|p| {
                let meter = table.meter(p.id())?;
                Some((OrderedFloat(meter.peer_update_quality()), p.id().to_string()))
            })
            .collect();
        routers.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        routers
            .into_iter()
            .take(node.config().signal.max_routers_per_signal)
            .map(|(_, id)| id)
            .collect()
    }

    /// Whether any known peer holds the `Router` role, however it is
    /// reached.
    fn knows_a_router(node: &MeshNode) -> bool {
        node.routing_table()
            .peers()
            .any(|p| p.has_role(RoleType::Router))
    }

    /// Grant `Peer` to a newbie, and `Router` as well while the mesh has
    /// none.
    fn onboard(node: &mut MeshNode, newbie: &str) {
        let mut granted = vec![RoleType::Peer];
        let mut routers = Self::routers(node);
        if !Self::knows_a_router(node) {
            granted.push(RoleType::Router);
            routers.push(newbie.to_string());
        }
        node.routing_table_mut().add_roles(newbie, &granted);
        info!(peer = %newbie, roles = ?granted, "onboarding newbie");

        let update = Message::role_update(node.my_address(), node.address_of(newbie), granted);
        if let Err(err) = node.send_message(&update) {
            debug!(peer = %newbie, %err, "role update not sent");
        }
        tasks::send_peer_update(node, newbie, &routers);
    }
}

impl Role for Signal {
    fn role_type(&self) -> RoleType {
        RoleType::Signal
    }

    fn on_message(&self, node: &mut MeshNode, message: &Message) {
        let sender = message.sender().peer_id();
        let sender_is_router = node
            .routing_table()
            .get_peer_by_id(sender)
            .is_some_and(|p| p.has_role(RoleType::Router));

        match message.body() {
            MessageBody::Introduction if !sender_is_router => {
                Self::onboard(node, sender);
            }
            MessageBody::PeerUpdate(_) if sender_is_router => {
                let routers = Self::routers(node);
                tasks::send_peer_update(node, sender, &routers);
            }
            _ => {}
        }
    }

    fn requires_peer(&self, _peer: &RemotePeer) -> bool {
        true
    }

    fn maintains_connection_goal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, pump, ws};
    use mitosis_core::Address;
    use mitosis_mesh::{ConnectionOptions, LoopbackNetwork};
    use std::collections::BTreeSet;

    fn onboarded(network: &LoopbackNetwork, id: &str, signal: &mut MeshNode) -> MeshNode {
        let mut newbie = node(network, id, &[RoleType::Newbie]);
        newbie.connect_to_signal(ws(signal.my_id())).unwrap();
        pump(&mut [&mut newbie, &mut *signal]);
        newbie.tick();
        pump(&mut [&mut newbie, &mut *signal]);
        newbie
    }

    #[test]
    fn first_newbie_becomes_router() {
        let network = LoopbackNetwork::new();
        let mut signal = node(&network, "s", &[RoleType::Signal]);
        let newbie = onboarded(&network, "n1", &mut signal);

        let expected: BTreeSet<RoleType> = [RoleType::Router, RoleType::Peer].into();
        assert_eq!(newbie.roles(), &expected);
        let known = signal.routing_table().get_peer_by_id("n1").unwrap();
        assert!(known.has_role(RoleType::Router));
        assert!(known.has_role(RoleType::Peer));
    }

    #[test]
    fn later_newbies_get_peer_and_the_router_list() {
        let network = LoopbackNetwork::new();
        let mut signal = node(&network, "s", &[RoleType::Signal]);
        let _router = onboarded(&network, "n1", &mut signal);
        let second = onboarded(&network, "n2", &mut signal);

        assert_eq!(second.roles(), &BTreeSet::from([RoleType::Peer]));
        let relayed = second
            .routing_table()
            .connection(&Address::via("n1", "s"))
            .expect("router advertised through the signal");
        assert!(relayed.is_open());
        let router = second.routing_table().get_peer_by_id("n1").unwrap();
        assert!(router.has_role(RoleType::Router));
        assert!(!router.has_role(RoleType::Signal));
    }

    #[test]
    fn router_peer_update_gets_a_refresh() {
        let network = LoopbackNetwork::new();
        let mut signal = node(&network, "s", &[RoleType::Signal]);
        let mut router = onboarded(&network, "n1", &mut signal);
        let mut received = router.observe_messages();

        tasks::send_peer_update(&mut router, "s", &[]);
        pump(&mut [&mut router, &mut signal]);

        let refresh = received.try_recv().unwrap();
        assert_eq!(refresh.sender().peer_id(), "s");
        assert!(matches!(refresh.body(), MessageBody::PeerUpdate(entries) if entries.len() == 1));
    }

    #[test]
    fn routers_are_capped_per_signal() {
        let network = LoopbackNetwork::new();
        let mut config = mitosis_core::MeshConfig::default();
        config.signal.max_routers_per_signal = 1;
        let mut signal = crate::testing::node_with(
            &network,
            "s",
            &[RoleType::Signal],
            config,
            mitosis_core::ManualClock::new(0),
        );
        let _router = onboarded(&network, "n1", &mut signal);
        let _second = onboarded(&network, "n2", &mut signal);
        signal.routing_table_mut().add_roles("n2", &[RoleType::Router]);

        assert_eq!(Signal::routers(&signal).len(), 1);
    }

    #[test]
    fn routers_beyond_the_cap_still_count_as_routers() {
        let network = LoopbackNetwork::new();
        let mut config = mitosis_core::MeshConfig::default();
        config.signal.max_routers_per_signal = 1;
        let mut signal = crate::testing::node_with(
            &network,
            "s",
            &[RoleType::Signal],
            config,
            mitosis_core::ManualClock::new(0),
        );
        let _first = onboarded(&network, "n1", &mut signal);
        let _second = onboarded(&network, "n2", &mut signal);
        signal.routing_table_mut().add_roles("n2", &[RoleType::Router]);
        let third = onboarded(&network, "n3", &mut signal);

        assert_eq!(third.roles(), &BTreeSet::from([RoleType::Peer]));
    }

    #[test]
    fn relayed_router_is_not_promoted_again() {
        let network = LoopbackNetwork::new();
        let mut signal = node(&network, "s", &[RoleType::Signal]);
        let mut q = node(&network, "q", &[RoleType::Peer]);
        q.connect_to(ws("s"), ConnectionOptions::default()).unwrap();
        pump(&mut [&mut q, &mut signal]);
        signal
            .connect_to(
                Address::via("r", "q"),
                ConnectionOptions::with_roles(vec![RoleType::Router]),
            )
            .unwrap();
        let mut newbie = node(&network, "n", &[RoleType::Newbie]);
        newbie.connect_to_signal(ws("s")).unwrap();
        pump(&mut [&mut newbie, &mut signal, &mut q]);
        newbie.tick();
        pump(&mut [&mut newbie, &mut signal, &mut q]);

        // The only router is reached through a relay, so none is handed out.
        assert_eq!(newbie.roles(), &BTreeSet::from([RoleType::Peer]));
        assert!(Signal::routers(&signal).is_empty());
    }
}
