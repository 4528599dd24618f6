//! Node configuration for a mesh node.
//!
//! [`NodeConfig`] wraps the mesh constants with the node's identity, its
//! starting roles and the signal it bootstraps through. Values come from the
//! defaults, then an optional TOML file, then `MITOSIS_*` environment
//! variables (`MITOSIS_MESH__DEFAULT_QUALITY=0.7` sets `mesh.default_quality`).

use std::path::Path;

use config::{Config, Environment, File};
use mitosis_core::{Address, ConfigError, MeshConfig, RoleType};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "MITOSIS";

/// Length of generated peer ids.
const GENERATED_ID_LEN: usize = 12;

/// Configuration for one mesh node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable identity of the node. A random id is generated when unset.
    pub peer_id: Option<String>,
    /// Roles the node starts with.
    pub roles: Vec<RoleType>,
    /// Signal to bootstrap through, e.g. `mitosis://signal/wss`.
    pub signal: Option<String>,
    /// Consumers this node can serve per channel.
    pub channel_capacity: u32,
    /// Log level filter string (e.g. "info", "debug", "mitosis_mesh=trace").
    pub log_level: String,
    /// Goals and metering constants.
    pub mesh: MeshConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            roles: vec![RoleType::Newbie],
            signal: None,
            channel_capacity: 0,
            log_level: "info".to_string(),
            mesh: MeshConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from an optional file layered under the `MITOSIS_*` environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let env = env
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("roles");

        let config: NodeConfig = builder
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the mesh constants and the signal address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mesh.validate()?;
        if self.peer_id.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Load("peer_id must not be empty".into()));
        }
        self.signal_address()?;
        Ok(())
    }

    /// The parsed bootstrap signal address, if one is configured.
    pub fn signal_address(&self) -> Result<Option<Address>, ConfigError> {
        self.signal
            .as_deref()
            .map(|raw| {
                raw.parse::<Address>()
                    .map_err(|e| ConfigError::Load(format!("signal: {e}")))
            })
            .transpose()
    }

    /// The configured peer id, or a freshly generated one.
    pub fn peer_id_or_random(&self) -> String {
        self.peer_id.clone().unwrap_or_else(random_peer_id)
    }
}

/// A random alphanumeric peer id.
pub fn random_peer_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mitosis_core::Protocol;
    use std::path::PathBuf;

    fn no_env() -> Environment {
        Environment::with_prefix(ENV_PREFIX).source(Some(config::Map::new()))
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("mitosis.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    // ------------------------------------------------------------------
    // Defaults
    // ------------------------------------------------------------------

    #[test]
    fn default_node_is_a_newbie() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.roles, vec![RoleType::Newbie]);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.signal.is_none());
    }

    #[test]
    fn loading_nothing_yields_defaults() {
        let cfg = NodeConfig::load_with_env(None, no_env()).unwrap();
        assert_eq!(cfg, NodeConfig::default());
    }

    #[test]
    fn random_ids_differ() {
        let a = random_peer_id();
        let b = random_peer_id();
        assert_eq!(a.len(), GENERATED_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn configured_peer_id_wins() {
        let cfg = NodeConfig {
            peer_id: Some("alpha".into()),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.peer_id_or_random(), "alpha");
    }

    // ------------------------------------------------------------------
    // File and environment layering
    // ------------------------------------------------------------------

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
peer_id = "alpha"
roles = ["signal"]
signal = "mitosis://boot/wss"

[mesh]
default_quality = 0.8
default_direct_protocol = "ws"

[mesh.peer]
direct_connections_goal_min = 2
"#,
        );
        let cfg = NodeConfig::load_with_env(Some(&path), no_env()).unwrap();
        assert_eq!(cfg.peer_id.as_deref(), Some("alpha"));
        assert_eq!(cfg.roles, vec![RoleType::Signal]);
        assert_eq!(cfg.mesh.default_quality, 0.8);
        assert_eq!(cfg.mesh.default_direct_protocol, Protocol::WebSocketUnsecure);
        assert_eq!(cfg.mesh.peer.direct_connections_goal_min, 2);
        assert_eq!(cfg.mesh.peer.direct_connections_goal_max, 5);
        assert_eq!(cfg.mesh.open_timeout_ms, MeshConfig::default().open_timeout_ms);
        assert_eq!(
            cfg.signal_address().unwrap(),
            Some(Address::direct("boot", Protocol::WebSocket))
        );
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "peer_id = \"alpha\"\n");
        let cfg = NodeConfig::load_with_env(
            Some(&path),
            env(&[
                ("MITOSIS_PEER_ID", "beta"),
                ("MITOSIS_ROLES", "newbie,peer"),
                ("MITOSIS_MESH__TICK_INTERVAL_MS", "250"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.peer_id.as_deref(), Some("beta"));
        assert_eq!(cfg.roles, vec![RoleType::Newbie, RoleType::Peer]);
        assert_eq!(cfg.mesh.tick_interval_ms, 250);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = NodeConfig::load_with_env(Some(&path), no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    #[test]
    fn contradictory_goals_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[mesh.router]\ndirect_connections_goal_min = 9\ndirect_connections_goal_max = 6\n",
        );
        let err = NodeConfig::load_with_env(Some(&path), no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::GoalRange { .. }), "{err}");
    }

    #[test]
    fn bad_signal_address_is_rejected() {
        let cfg = NodeConfig {
            signal: Some("boot/wss".into()),
            ..NodeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Load(_))));
    }

    #[test]
    fn empty_peer_id_is_rejected() {
        let cfg = NodeConfig {
            peer_id: Some(String::new()),
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
