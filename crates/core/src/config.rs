//! Agent Configuration
//!
//! Manages all agent settings including:
//! - Forwardable port range
//! - Device registration policy (minimum API level, boot wait budget)
//! - Request channel retry behavior
//! - Emulator console timeouts
//! - Optional farm server connection

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use directories::ProjectDirs;
use tracing::{info, debug};

use crate::error::{AgentError, Result};

/// Local port range handed to the port allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Lowest forwardable local port (inclusive)
    pub min_forward_port: u16,
    /// Highest forwardable local port (inclusive)
    pub max_forward_port: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            min_forward_port: 6000,
            max_forward_port: 6099,
        }
    }
}

/// Device registration policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Devices reporting an API level below this are not registered
    pub min_api_level: u32,
    /// Seconds between boot-readiness probes
    pub boot_poll_interval_secs: u64,
    /// Total boot-readiness budget in seconds; elapsing it is a warning,
    /// not a failure
    pub boot_timeout_secs: u64,
    /// Install missing companion packages automatically
    pub auto_setup: bool,
    /// Directory holding the companion install artifacts
    pub companion_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            min_api_level: 17,
            boot_poll_interval_secs: 1,
            boot_timeout_secs: 120,
            auto_setup: true,
            companion_dir: PathBuf::from("companions"),
        }
    }
}

/// On-device request channel behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Transport attempts per request before giving up
    pub retry_limit: u32,
    /// Fixed pause between attempts, in milliseconds
    pub retry_backoff_ms: u64,
    /// Per-attempt connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            retry_backoff_ms: 500,
            connect_timeout_ms: 2_000,
        }
    }
}

/// Emulator console client behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Wall-clock budget for one command round trip, in milliseconds
    pub command_timeout_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5_000,
        }
    }
}

/// Farm server connection; absent means device-list changes are tracked
/// locally only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Endpoint the agent reports device-list changes to
    pub endpoint: String,
}

/// Top-level agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub ports: PortConfig,
    pub devices: DeviceConfig,
    pub channel: ChannelConfig,
    pub console: ConsoleConfig,
    pub server: Option<ServerConfig>,
}

impl AgentConfig {
    /// Default config file path under the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "droidfarm", "droidfarm")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from an explicit path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        info!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Persist to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()
            .ok_or_else(|| AgentError::Config("No config directory available".into()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject configurations the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ports.min_forward_port > self.ports.max_forward_port {
            return Err(AgentError::Config(format!(
                "Invalid port range: {} > {}",
                self.ports.min_forward_port, self.ports.max_forward_port
            )));
        }
        if self.channel.retry_limit == 0 {
            return Err(AgentError::Config(
                "channel.retry_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.devices.min_api_level, 17);
        assert!(config.server.is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");

        let mut config = AgentConfig::default();
        config.ports.min_forward_port = 7000;
        config.ports.max_forward_port = 7010;
        config.server = Some(ServerConfig {
            endpoint: "farm.example.com:9000".into(),
        });

        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = AgentConfig::load_from(&path).unwrap();

        assert_eq!(loaded.ports.min_forward_port, 7000);
        assert_eq!(loaded.ports.max_forward_port, 7010);
        assert_eq!(loaded.server.unwrap().endpoint, "farm.example.com:9000");
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut config = AgentConfig::default();
        config.ports.min_forward_port = 9000;
        config.ports.max_forward_port = 8000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[devices]\nmin_api_level = 21\n").unwrap();

        let loaded = AgentConfig::load_from(&path).unwrap();
        assert_eq!(loaded.devices.min_api_level, 21);
        assert_eq!(loaded.channel.retry_limit, ChannelConfig::default().retry_limit);
    }
}
