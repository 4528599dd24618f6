//! Mesh configuration.
//!
//! [`MeshConfig`] carries one [`RoleConfig`] per role plus the node-wide
//! metering and timing constants. It is consumed read-only by metering and
//! role logic; every field has a default so partial config files work.

use crate::address::Protocol;
use crate::error::ConfigError;
use crate::role::RoleType;
use serde::{Deserialize, Serialize};

/// Connection goals for one role.
///
/// A partially specified role table in a config file is completed from the
/// `Peer` defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    /// Below this many direct peers the node actively opens connections.
    pub direct_connections_goal_min: usize,
    /// Upper end of the goal band; also the saturation denominator.
    pub direct_connections_goal_max: usize,
    /// Hard cap on direct peers.
    pub direct_connections_max: usize,
    /// How many routers a signal hands to a newbie. Only read from the
    /// `Signal` table, where it must be non-zero.
    pub max_routers_per_signal: usize,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self::peer()
    }
}

impl RoleConfig {
    pub fn newbie() -> Self {
        Self {
            direct_connections_goal_min: 0,
            direct_connections_goal_max: 1,
            direct_connections_max: 2,
            max_routers_per_signal: 0,
        }
    }

    pub fn signal() -> Self {
        Self {
            direct_connections_goal_min: 0,
            direct_connections_goal_max: 1,
            direct_connections_max: 1000,
            max_routers_per_signal: 5,
        }
    }

    pub fn router() -> Self {
        Self {
            direct_connections_goal_min: 4,
            direct_connections_goal_max: 6,
            direct_connections_max: 12,
            max_routers_per_signal: 0,
        }
    }

    pub fn peer() -> Self {
        Self {
            direct_connections_goal_min: 3,
            direct_connections_goal_max: 5,
            direct_connections_max: 10,
            max_routers_per_signal: 0,
        }
    }

    /// Element-wise maximum of two goal sets.
    pub fn max(self, other: RoleConfig) -> RoleConfig {
        RoleConfig {
            direct_connections_goal_min: self
                .direct_connections_goal_min
                .max(other.direct_connections_goal_min),
            direct_connections_goal_max: self
                .direct_connections_goal_max
                .max(other.direct_connections_goal_max),
            direct_connections_max: self.direct_connections_max.max(other.direct_connections_max),
            max_routers_per_signal: self.max_routers_per_signal.max(other.max_routers_per_signal),
        }
    }

    fn validate(&self, role: RoleType) -> Result<(), ConfigError> {
        if self.direct_connections_goal_min > self.direct_connections_goal_max {
            return Err(ConfigError::GoalRange {
                role: role.to_string(),
                min: self.direct_connections_goal_min,
                max: self.direct_connections_goal_max,
            });
        }
        if self.direct_connections_goal_max > self.direct_connections_max {
            return Err(ConfigError::GoalAboveMax {
                role: role.to_string(),
                goal_max: self.direct_connections_goal_max,
                max: self.direct_connections_max,
            });
        }
        if self.direct_connections_goal_max == 0 {
            return Err(ConfigError::ZeroGoalMax {
                role: role.to_string(),
            });
        }
        Ok(())
    }
}

/// Complete configuration of one mesh node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub newbie: RoleConfig,
    pub signal: RoleConfig,
    pub router: RoleConfig,
    pub peer: RoleConfig,
    /// Quality assumed when nothing has been measured yet.
    pub default_quality: f64,
    /// How long a punishment keeps counting against a connection.
    pub punishment_time_ms: u64,
    /// Grace period granted to a freshly opened connection.
    pub protection_time_ms: u64,
    /// Upper bound on the OPENING state.
    pub open_timeout_ms: u64,
    /// A direct connection silent for this long is considered expired.
    pub last_seen_expiry_ms: u64,
    /// Period of the role tick.
    pub tick_interval_ms: u64,
    /// Ticks between two peer-update gossip rounds.
    pub peer_update_interval_ticks: u64,
    /// Ticks between two channel announcement rounds.
    pub channel_announcement_interval_ticks: u64,
    /// Length of the router-alive ranking history.
    pub router_alive_history: usize,
    /// Protocol used when the connection goal opens new direct links.
    pub default_direct_protocol: Protocol,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            newbie: RoleConfig::newbie(),
            signal: RoleConfig::signal(),
            router: RoleConfig::router(),
            peer: RoleConfig::peer(),
            default_quality: 0.5,
            punishment_time_ms: 20_000,
            protection_time_ms: 30_000,
            open_timeout_ms: 20_000,
            last_seen_expiry_ms: 60_000,
            tick_interval_ms: 1_000,
            peer_update_interval_ticks: 5,
            channel_announcement_interval_ticks: 10,
            router_alive_history: 10,
            default_direct_protocol: Protocol::WebRtcData,
        }
    }
}

impl MeshConfig {
    /// Goals configured for a single role.
    pub fn role(&self, role: RoleType) -> &RoleConfig {
        match role {
            RoleType::Newbie => &self.newbie,
            RoleType::Signal => &self.signal,
            RoleType::Router => &self.router,
            RoleType::Peer => &self.peer,
        }
    }

    /// Goals of a node holding all of `roles`: the element-wise maximum.
    /// A node without roles falls back to the newbie goals.
    pub fn effective_goals<'a>(&self, roles: impl IntoIterator<Item = &'a RoleType>) -> RoleConfig {
        roles
            .into_iter()
            .map(|role| *self.role(*role))
            .reduce(RoleConfig::max)
            .unwrap_or(self.newbie)
    }

    /// Reject contradictory goals and out-of-range constants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for role in RoleType::ALL {
            self.role(role).validate(role)?;
        }
        if !(0.0..=1.0).contains(&self.default_quality) {
            return Err(ConfigError::QualityOutOfRange {
                name: "default_quality".into(),
                value: self.default_quality,
            });
        }
        if !self.default_direct_protocol.is_direct_data() {
            return Err(ConfigError::NotDirectProtocol(
                self.default_direct_protocol.to_string(),
            ));
        }
        let non_zero = [
            ("open_timeout_ms", self.open_timeout_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("peer_update_interval_ticks", self.peer_update_interval_ticks),
            (
                "channel_announcement_interval_ticks",
                self.channel_announcement_interval_ticks,
            ),
            ("router_alive_history", self.router_alive_history as u64),
            (
                "signal.max_routers_per_signal",
                self.signal.max_routers_per_signal as u64,
            ),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name.into()));
            }
        }
        Ok(())
    }
}
