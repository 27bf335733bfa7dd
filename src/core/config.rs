use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::NodeId;
use crate::utils::{P2PError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    /// 0 lets the operating system pick a free port.
    pub port: u16,
    pub shared_dir: PathBuf,
    /// Fixed identity; a random one is generated when absent.
    pub node_id: Option<String>,
    pub probe_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub peer_update_interval_ms: u64,
    pub file_update_interval_ms: u64,
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            shared_dir: PathBuf::from("files"),
            node_id: None,
            probe_timeout_ms: 1_000,
            request_timeout_ms: 5_000,
            peer_update_interval_ms: 2_000,
            file_update_interval_ms: 2_000,
            max_message_size: 64 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            P2PError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            P2PError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(P2PError::ConfigError("host must not be empty".to_string()));
        }
        let durations = [
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("peer_update_interval_ms", self.peer_update_interval_ms),
            ("file_update_interval_ms", self.file_update_interval_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(P2PError::ConfigError(format!("{} must be positive", name)));
            }
        }
        if self.max_message_size == 0 {
            return Err(P2PError::ConfigError(
                "max_message_size must be positive".to_string(),
            ));
        }
        if let Some(id) = &self.node_id {
            NodeId::parse(id).map_err(|e| P2PError::ConfigError(e.to_string()))?;
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn peer_update_interval(&self) -> Duration {
        Duration::from_millis(self.peer_update_interval_ms)
    }

    pub fn file_update_interval(&self) -> Duration {
        Duration::from_millis(self.file_update_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe_timeout(), Duration::from_secs(1));
        assert_eq!(config.shared_dir, PathBuf::from("files"));
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_bad_id() {
        let config = Config {
            peer_update_interval_ms: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(P2PError::ConfigError(_))));

        let config = Config {
            node_id: Some("not|||valid".to_string()),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(P2PError::ConfigError(_))));
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{ "port": 51000, "node_id": "AAAAAAAA" }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 51000);
        assert_eq!(config.node_id.as_deref(), Some("AAAAAAAA"));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.request_timeout_ms, 5_000);
    }
}
