//! Peer scoring.
//!
//! [`RemotePeerMeter`] is a borrowed view computed on demand from one peer
//! and the routing table it lives in. All scores are in `[0, 1]`.

use crate::connection::Connection;
use crate::peer::RemotePeer;
use crate::routing_table::RoutingTable;
use mitosis_core::MeshConfig;
use std::collections::VecDeque;

/// Bounded history of how well a peer has been reachable as a router.
///
/// Every delivered message records one ranking for its sender.
#[derive(Debug, Clone)]
pub struct RouterAliveHighscore {
    capacity: usize,
    rankings: VecDeque<f64>,
}

impl RouterAliveHighscore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rankings: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn record(&mut self, ranking: f64) {
        if self.rankings.len() == self.capacity {
            self.rankings.pop_front();
        }
        self.rankings.push_back(ranking.clamp(0.0, 1.0));
    }

    /// Mean of the recorded rankings, `None` while empty.
    pub fn average_ranking(&self) -> Option<f64> {
        if self.rankings.is_empty() {
            return None;
        }
        Some(self.rankings.iter().sum::<f64>() / self.rankings.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.rankings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rankings.is_empty()
    }
}

/// Scores of one remote peer.
#[derive(Debug, Clone, Copy)]
pub struct RemotePeerMeter<'a> {
    peer: &'a RemotePeer,
    table: &'a RoutingTable,
}

impl<'a> RemotePeerMeter<'a> {
    pub fn new(peer: &'a RemotePeer, table: &'a RoutingTable) -> Self {
        Self { peer, table }
    }

    fn config(&self) -> &'a MeshConfig {
        self.table.config()
    }

    /// Most recent traffic on any connection to the peer.
    pub fn last_seen(&self) -> Option<u64> {
        self.peer
            .connection_table()
            .iter()
            .map(|c| c.meter().last_seen())
            .max()
    }

    /// `true` when no connection saw traffic within the expiry window.
    pub fn last_seen_is_expired(&self, now_ms: u64) -> bool {
        self.peer
            .connection_table()
            .iter()
            .all(|c| c.meter().is_last_seen_expired(now_ms, self.config().last_seen_expiry_ms))
    }

    /// Mean quality of OPEN connections over measured protocols.
    pub fn average_connection_quality(&self) -> f64 {
        let qualities: Vec<f64> = self
            .peer
            .connection_table()
            .iter()
            .filter(|c| c.is_open() && c.address().protocol().is_measured())
            .map(Connection::quality)
            .collect();
        if qualities.is_empty() {
            return self.config().default_quality;
        }
        qualities.iter().sum::<f64>() / qualities.len() as f64
    }

    /// Highest quality over all connections, 0 without connections.
    pub fn best_connection_quality(&self) -> f64 {
        self.peer
            .connection_table()
            .iter()
            .map(Connection::quality)
            .fold(0.0, f64::max)
    }

    /// Peers we reach through this peer, i.e. the degree it reported to us.
    pub fn reported_connection_count(&self) -> usize {
        self.table
            .peers()
            .map(|p| {
                p.connection_table()
                    .view()
                    .filter_via()
                    .filter_by_location(self.peer.id())
                    .len()
            })
            .sum()
    }

    pub fn direct_connection_count(&self) -> usize {
        self.peer.connection_table().view().filter_direct_data().len()
    }

    /// How much spare capacity the peer has, by the peer role's limits.
    pub fn connection_saturation(&self) -> f64 {
        let goals = &self.config().peer;
        let used = self.reported_connection_count() + self.direct_connection_count();
        let spare = goals.direct_connections_max as f64 - used as f64;
        (spare / goals.direct_connections_goal_max as f64).clamp(0.0, 1.0)
    }

    /// 1 while a protected connection exists and the peer is still below
    /// its connection goal.
    pub fn connection_protection(&self) -> f64 {
        let below_goal =
            self.reported_connection_count() < self.config().peer.direct_connections_goal_min;
        let protected = self
            .peer
            .connection_table()
            .iter()
            .any(|c| c.meter().is_protected());
        if below_goal && protected { 1.0 } else { 0.0 }
    }

    /// Share of direct data connections that are not punished.
    pub fn average_connection_punishment(&self) -> f64 {
        let direct = self.peer.connection_table().view().filter_direct_data();
        if direct.is_empty() {
            return 0.0;
        }
        let punished = direct.iter().filter(|c| c.meter().is_punished()).count();
        (direct.len() - punished) as f64 / direct.len() as f64
    }

    /// Mean alive ranking, or `default_quality` while the peer has no
    /// history or only zero rankings.
    pub fn router_link_quality(&self) -> f64 {
        match self.peer.router_alive().average_ranking() {
            Some(ranking) if ranking > 0.0 => ranking,
            _ => self.config().default_quality,
        }
    }

    /// Router link quality of the peer itself when directly connected,
    /// otherwise the mean over the peers relaying to it.
    pub fn average_router_link_quality(&self) -> f64 {
        if self.direct_connection_count() > 0 {
            return self.router_link_quality();
        }
        let relays: Vec<f64> = self
            .peer
            .connection_table()
            .view()
            .filter_via()
            .iter()
            .filter_map(|c| c.address().location())
            .filter_map(|location| self.table.meter(location))
            .map(|meter| meter.router_link_quality())
            .collect();
        if relays.is_empty() {
            return 0.0;
        }
        relays.iter().sum::<f64>() / relays.len() as f64
    }

    /// Composite quality used for routing decisions.
    pub fn quality(&self) -> f64 {
        let trust = self.average_connection_punishment() + self.connection_protection();
        (self.average_connection_quality() * trust).clamp(0.0, 1.0)
    }

    /// Quality advertised for this peer in outgoing PEER_UPDATEs.
    pub fn peer_update_quality(&self) -> f64 {
        (self.best_connection_quality() * self.connection_saturation() * self.router_link_quality())
            .clamp(0.0, 1.0)
    }

    /// How attractive the peer is as a new direct neighbour.
    pub fn acquisition_quality(&self) -> f64 {
        (self.average_router_link_quality()
            * self.average_connection_quality()
            * self.connection_saturation())
        .clamp(0.0, 1.0)
    }
}
