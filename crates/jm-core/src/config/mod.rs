//! Configuration management for jobmesh
//!
//! Every binary reads the same TOML file. Sections that are absent fall back
//! to their defaults, so an empty file is a valid configuration.

mod auth;
mod discovery;
mod meta;
mod network;
pub mod serde_utils;
mod worker;

pub use auth::AuthConfig;
pub use discovery::DiscoveryConfig;
pub use meta::MetaConfig;
pub use network::{BackoffConfig, NetworkConfig};
pub use worker::{LivenessConfig, WorkerConfig};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration shared by workers, the meta-server and the CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Ports, timeouts and TLS material
    pub network: NetworkConfig,
    /// Meta-server location and behaviour
    pub meta: MetaConfig,
    /// Multicast discovery
    pub discovery: DiscoveryConfig,
    /// Output-based liveness heuristic
    pub liveness: LivenessConfig,
    /// Worker server behaviour
    pub worker: WorkerConfig,
    /// Key pair and challenge settings
    pub auth: AuthConfig,
}

impl MeshConfig {
    /// Load from an explicit path, the default path, or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => load_config(path),
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    load_config(&default_path)
                } else {
                    tracing::debug!("No config at {:?}, using defaults", default_path);
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobmesh")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_file_is_default() {
        let config: MeshConfig = toml::from_str("").unwrap();
        assert_eq!(config.network.start_port, 18000);
        assert_eq!(config.meta.port, 17999);
        assert_eq!(config.worker.ring_lines, 100);
    }

    #[test]
    fn test_partial_section() {
        let config: MeshConfig = toml::from_str(
            r#"
            [network]
            connect_timeout = 200

            [meta]
            address = "10.1.2.3"
            search_subnets = ["10.1.2.0/28"]
            "#,
        )
        .unwrap();
        assert_eq!(config.network.connect_timeout, Duration::from_millis(200));
        assert_eq!(config.network.port_count, 100);
        assert_eq!(config.meta.address, "10.1.2.3");
        assert_eq!(config.meta.search_subnets, vec!["10.1.2.0/28".to_string()]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = MeshConfig::default();
        config.meta.port = 27999;
        save_config(&path, &config).unwrap();

        let loaded: MeshConfig = load_config(&path).unwrap();
        assert_eq!(loaded.meta.port, 27999);
    }

    #[test]
    fn test_missing_explicit_path() {
        let err = MeshConfig::load_or_default(Some(Path::new("/nonexistent/jobmesh.toml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
