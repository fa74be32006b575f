//! Config loading, tracing, and node wiring.

use std::path::PathBuf;
use std::sync::Arc;

use cooperate_profile::{ProfileService, ProfileSyncClient};
use cooperate_transport::{ControlTransport, SessionService};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::CooperateError;
use crate::machine::{Collaborators, CooperationStateMachine};

/// Load configuration from the given path, or the default location.
pub fn load_config(path: Option<&str>) -> Result<Config, CooperateError> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| CooperateError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CooperateError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Log filter for a node: `RUST_LOG` if set, `default_level` otherwise.
pub fn log_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global tracing subscriber for `config`. Later calls are
/// no-ops.
pub fn init_tracing(config: &Config) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.node.log_level))
        .try_init();
}

/// Build a node's transport, profile client and state machine from
/// `config`.
///
/// Must run inside a tokio runtime. The session service reports back
/// through the returned machine's [`transport`](CooperationStateMachine::transport).
pub fn build_node(
    config: &Config,
    sessions: Arc<dyn SessionService>,
    profiles: Arc<dyn ProfileService>,
    collaborators: Collaborators,
) -> Result<Arc<CooperationStateMachine>, CooperateError> {
    let transport = Arc::new(ControlTransport::new(config.transport_config(), sessions)?);
    let profile = ProfileSyncClient::new(config.profile_config(), profiles);
    info!(node = %config.network_id(), "node assembled");
    Ok(CooperationStateMachine::new(transport, profile, collaborators))
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("input-cooperate")
}

/// Get the default config file path.
fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("input-cooperate-no-such-config.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.transport.open_timeout_ms, 5000);
    }

    #[test]
    fn unparsable_file_is_a_config_error() {
        let path = std::env::temp_dir().join(format!(
            "input-cooperate-bad-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[node\nnetwork_id = ").unwrap();
        let err = load_config(path.to_str()).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, CooperateError::Config(_)));
    }

    #[test]
    fn tracing_init_is_repeatable() {
        let config: Config = toml::from_str("[node]\nlog_level = \"warn\"").unwrap();
        init_tracing(&config);
        init_tracing(&config);
        tracing::warn!("still logging");
    }

    #[test]
    fn config_lives_under_input_cooperate() {
        assert!(default_config_path().ends_with("input-cooperate/config.toml"));
    }
}
