//! Remote peers as known to the local routing table.

use crate::connection::{Connection, ConnectionState, ConnectionTable};
use crate::metering::RouterAliveHighscore;
use mitosis_core::{Address, RoleType, Subject};
use std::collections::BTreeSet;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChurnType {
    Added,
    Removed,
}

/// A connection entered or left a peer's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChurn {
    pub kind: ChurnType,
    pub address: Address,
}

/// Everything the local node knows about one remote peer.
///
/// Owned by the routing table; the peer exists exactly as long as it has at
/// least one connection.
#[derive(Debug)]
pub struct RemotePeer {
    id: String,
    roles: BTreeSet<RoleType>,
    connections: ConnectionTable,
    router_alive: RouterAliveHighscore,
    churn: Subject<ConnectionChurn>,
}

impl RemotePeer {
    pub(crate) fn new(id: impl Into<String>, router_alive_history: usize) -> Self {
        Self {
            id: id.into(),
            roles: BTreeSet::new(),
            connections: ConnectionTable::new(),
            router_alive: RouterAliveHighscore::new(router_alive_history),
            churn: Subject::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn roles(&self) -> &BTreeSet<RoleType> {
        &self.roles
    }

    pub fn has_role(&self, role: RoleType) -> bool {
        self.roles.contains(&role)
    }

    /// Add roles; never removes any. Returns `true` if the set grew.
    pub(crate) fn add_roles(&mut self, roles: impl IntoIterator<Item = RoleType>) -> bool {
        let before = self.roles.len();
        self.roles.extend(roles);
        self.roles.len() != before
    }

    pub fn connection_table(&self) -> &ConnectionTable {
        &self.connections
    }

    pub(crate) fn connection_mut(&mut self, address: &Address) -> Option<&mut Connection> {
        self.connections.get_mut(address)
    }

    pub(crate) fn connections_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    pub fn router_alive(&self) -> &RouterAliveHighscore {
        &self.router_alive
    }

    pub(crate) fn router_alive_mut(&mut self) -> &mut RouterAliveHighscore {
        &mut self.router_alive
    }

    /// Stream of connections added to and removed from this peer.
    pub fn observe_churn(&mut self) -> mpsc::UnboundedReceiver<ConnectionChurn> {
        self.churn.subscribe()
    }

    pub(crate) fn add_connection(&mut self, connection: Connection) -> Result<(), Connection> {
        let address = connection.address().clone();
        self.connections.insert(connection)?;
        self.churn.publish(ConnectionChurn {
            kind: ChurnType::Added,
            address,
        });
        Ok(())
    }

    pub(crate) fn remove_connection(&mut self, address: &Address) -> Option<Connection> {
        let removed = self.connections.remove(address)?;
        self.churn.publish(ConnectionChurn {
            kind: ChurnType::Removed,
            address: removed.address().clone(),
        });
        if self.connections.is_empty() {
            self.churn.close();
        }
        Some(removed)
    }

    /// Best OPEN connection of any kind.
    pub fn best_open_connection(&self) -> Option<&Connection> {
        self.connections
            .view()
            .filter_by_states(&[ConnectionState::Open])
            .sort_by_quality()
            .first()
    }

    /// Best OPEN direct data connection.
    pub fn best_direct_connection(&self) -> Option<&Connection> {
        self.connections
            .view()
            .filter_direct_data()
            .filter_by_states(&[ConnectionState::Open])
            .sort_by_quality()
            .first()
    }

    /// `true` while a direct data connection is OPEN or OPENING.
    pub fn has_live_direct_connection(&self) -> bool {
        !self
            .connections
            .view()
            .filter_direct_data()
            .filter_by_states(&[ConnectionState::Open, ConnectionState::Opening])
            .is_empty()
    }

    /// `true` if any connection of any kind or state is direct.
    pub fn has_direct_connection(&self) -> bool {
        self.connections.iter().any(Connection::is_direct)
    }
}
