//! Cooperative roles a mesh node can enact.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A behaviour bundle. A node may hold several roles at once.
///
/// The derive order doubles as the ordering in role sets, so `Newbie`
/// always sorts first and `Peer` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// Freshly started node looking for a signal to onboard it.
    Newbie,
    /// Bootstrap authority that promotes newbies and hands out routers.
    Signal,
    /// Relays traffic for peers it is directly connected to.
    Router,
    /// Regular mesh participant maintaining direct connections.
    Peer,
}

impl RoleType {
    /// Every role, in declaration order.
    pub const ALL: [RoleType; 4] = [
        RoleType::Newbie,
        RoleType::Signal,
        RoleType::Router,
        RoleType::Peer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Newbie => "newbie",
            RoleType::Signal => "signal",
            RoleType::Router => "router",
            RoleType::Peer => "peer",
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
