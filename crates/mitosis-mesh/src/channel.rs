//! Media channels known to the local node.
//!
//! Only the bookkeeping lives here: which peers provide a channel, whether a
//! live source is among them, and the announcement entries a node gossips.
//! Media transport itself is out of scope.

use mitosis_core::{ChannelAnnouncementEntry, ChannelProviderEntry};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProvider {
    pub peer_id: String,
    /// How many consumers the provider can still serve.
    pub capacity: u32,
    /// Originates the stream rather than relaying it.
    pub is_source: bool,
    pub is_live: bool,
    pub is_active: bool,
}

impl ChannelProvider {
    pub fn source(peer_id: impl Into<String>, capacity: u32) -> Self {
        Self {
            peer_id: peer_id.into(),
            capacity,
            is_source: true,
            is_live: true,
            is_active: true,
        }
    }

    pub fn relay(peer_id: impl Into<String>, capacity: u32) -> Self {
        Self {
            is_source: false,
            ..Self::source(peer_id, capacity)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    id: String,
    providers: BTreeMap<String, ChannelProvider>,
}

impl Channel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            providers: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Insert or replace the provider entry for its peer.
    pub fn add_provider(&mut self, provider: ChannelProvider) {
        self.providers.insert(provider.peer_id.clone(), provider);
    }

    pub fn remove_provider(&mut self, peer_id: &str) -> Option<ChannelProvider> {
        self.providers.remove(peer_id)
    }

    pub fn provider(&self, peer_id: &str) -> Option<&ChannelProvider> {
        self.providers.get(peer_id)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ChannelProvider> {
        self.providers.values()
    }

    pub fn is_active(&self) -> bool {
        self.providers.values().any(|p| p.is_active)
    }

    /// A source that is both live and active provides the channel.
    pub fn has_live_source(&self) -> bool {
        self.providers
            .values()
            .any(|p| p.is_source && p.is_live && p.is_active)
    }

    fn announcement(&self) -> ChannelAnnouncementEntry {
        ChannelAnnouncementEntry {
            channel_id: self.id.clone(),
            providers: self
                .providers
                .values()
                .filter(|p| p.is_active)
                .map(|p| ChannelProviderEntry {
                    peer_id: p.peer_id.clone(),
                    capacity: p.capacity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    channels: BTreeMap<String, Channel>,
    /// Consumers this node can serve, advertised with every announcement.
    capacity: u32,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity;
    }

    pub fn insert(&mut self, channel: Channel) {
        self.channels.insert(channel.id.clone(), channel);
    }

    pub fn remove(&mut self, channel_id: &str) -> Option<Channel> {
        self.channels.remove(channel_id)
    }

    pub fn get(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.get(channel_id)
    }

    pub fn get_mut(&mut self, channel_id: &str) -> Option<&mut Channel> {
        self.channels.get_mut(channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Announcement entries for every channel with a live source, with
    /// `my_id` listed as a provider at this node's current capacity.
    pub fn announcements(&self, my_id: &str) -> Vec<ChannelAnnouncementEntry> {
        self.channels
            .values()
            .filter(|c| c.has_live_source())
            .map(|channel| {
                let mut entry = channel.announcement();
                match entry.providers.iter_mut().find(|p| p.peer_id == my_id) {
                    Some(me) => me.capacity = self.capacity,
                    None => entry.providers.push(ChannelProviderEntry {
                        peer_id: my_id.to_string(),
                        capacity: self.capacity,
                    }),
                }
                entry
            })
            .collect()
    }
}
