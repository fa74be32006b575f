//! Node configuration loaded from TOML.

use std::time::Duration;

use cooperate_profile::ProfileConfig;
use cooperate_transport::TransportConfig;
use cooperate_types::NetworkId;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub profile: ProfileSection,
}

impl Config {
    /// Network id of this node.
    pub fn network_id(&self) -> NetworkId {
        NetworkId::new(self.node.network_id.clone())
    }

    pub fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::new(self.network_id());
        config.session_name.clone_from(&self.transport.session_name);
        config.open_timeout = Duration::from_millis(self.transport.open_timeout_ms);
        config
    }

    pub fn profile_config(&self) -> ProfileConfig {
        ProfileConfig {
            service_id: self.profile.service_id.clone(),
            characteristic: self.profile.characteristic.clone(),
        }
    }
}

/// Node identity and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_network_id")]
    pub network_id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            log_level: default_log_level(),
        }
    }
}

/// Control session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_session_name")]
    pub session_name: String,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            session_name: default_session_name(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

/// Where the crossing switch is stored in the profile service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSection {
    #[serde(default = "default_service_id")]
    pub service_id: String,
    #[serde(default = "default_characteristic")]
    pub characteristic: String,
}

impl Default for ProfileSection {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            characteristic: default_characteristic(),
        }
    }
}

fn default_network_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "input-cooperate".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_name() -> String {
    "input-cooperate.control".to_string()
}

fn default_open_timeout_ms() -> u64 {
    5000
}

fn default_service_id() -> String {
    "input-cooperate".to_string()
}

fn default_characteristic() -> String {
    "crossingSwitchState".to_string()
}
