use super::{Connection, ConnectionState};
use mitosis_core::{Address, Protocol};
use std::cmp::Ordering;

/// The connections to one remote peer, in insertion order.
///
/// Holds at most one connection per `(protocol, location)` key.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: Vec<Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Returns it back if its key is already taken.
    pub fn insert(&mut self, connection: Connection) -> Result<(), Connection> {
        if self.get(connection.address()).is_some() {
            return Err(connection);
        }
        self.connections.push(connection);
        Ok(())
    }

    pub fn remove(&mut self, address: &Address) -> Option<Connection> {
        let index = self.position(address)?;
        Some(self.connections.remove(index))
    }

    pub fn get(&self, address: &Address) -> Option<&Connection> {
        self.position(address).map(|index| &self.connections[index])
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut Connection> {
        let index = self.position(address)?;
        Some(&mut self.connections[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Start a filter/sort chain over every connection.
    pub fn view(&self) -> ConnectionView<'_> {
        ConnectionView {
            connections: self.connections.iter().collect(),
        }
    }

    fn position(&self, address: &Address) -> Option<usize> {
        let key = address.connection_key();
        self.connections
            .iter()
            .position(|c| c.address().connection_key() == key)
    }
}

/// Borrowed, chainable selection of connections.
#[derive(Debug, Clone)]
pub struct ConnectionView<'a> {
    connections: Vec<&'a Connection>,
}

impl<'a> ConnectionView<'a> {
    pub fn filter(mut self, predicate: impl Fn(&Connection) -> bool) -> Self {
        self.connections.retain(|c| predicate(c));
        self
    }

    pub fn filter_by_protocol(self, protocols: &[Protocol]) -> Self {
        self.filter(|c| protocols.contains(&c.address().protocol()))
    }

    pub fn filter_by_states(self, states: &[ConnectionState]) -> Self {
        self.filter(|c| states.contains(&c.state()))
    }

    pub fn filter_direct(self) -> Self {
        self.filter(Connection::is_direct)
    }

    /// Direct connections that carry mesh messages.
    pub fn filter_direct_data(self) -> Self {
        self.filter(|c| c.address().protocol().is_direct_data())
    }

    pub fn filter_via(self) -> Self {
        self.filter(Connection::is_via)
    }

    /// VIA connections relaying through `location`.
    pub fn filter_by_location(self, location: &str) -> Self {
        self.filter(|c| c.address().location() == Some(location))
    }

    /// Highest quality first; on ties direct connections precede VIA ones
    /// and otherwise insertion order is kept.
    pub fn sort_by_quality(mut self) -> Self {
        self.connections.sort_by(|a, b| {
            b.quality()
                .partial_cmp(&a.quality())
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.is_direct().cmp(&a.is_direct()))
        });
        self
    }

    pub fn first(&self) -> Option<&'a Connection> {
        self.connections.first().copied()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Connection> + '_ {
        self.connections.iter().copied()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.connections.iter().map(|c| c.address().clone()).collect()
    }
}

impl<'a> IntoIterator for ConnectionView<'a> {
    type Item = &'a Connection;
    type IntoIter = std::vec::IntoIter<&'a Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.into_iter()
    }
}
