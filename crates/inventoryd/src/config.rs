//! Configuration file support for inventoryd
//!
//! Loads and validates collector configuration from TOML files.
//! Default location: /etc/usbfleet/inventoryd.conf

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the collector API
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// SSE keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding persisted org partitions
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Bound on partition lock waits, in milliseconds
    #[serde(default = "default_lock_wait")]
    pub lock_wait_ms: u64,

    /// Buffered snapshots per subscriber before oldest-drop kicks in
    #[serde(default = "default_fanout_capacity")]
    pub fanout_capacity: usize,
}

/// Complete inventoryd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorydConfig {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Central store
    #[serde(default)]
    pub store: StoreConfig,
}

// Default functions
fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_keepalive() -> u64 {
    5
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/usbfleet/inventory")
}

fn default_lock_wait() -> u64 {
    2000
}

fn default_fanout_capacity() -> usize {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            keepalive_secs: default_keepalive(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lock_wait_ms: default_lock_wait(),
            fanout_capacity: default_fanout_capacity(),
        }
    }
}

impl InventorydConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    StoreError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default("/etc/usbfleet/inventoryd.conf")
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server.listen_addr.parse().map_err(|e| {
            StoreError::Configuration(format!(
                "invalid listen_addr {:?}: {}",
                self.server.listen_addr, e
            ))
        })
    }

    /// Get SSE keep-alive interval as Duration
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_secs)
    }

    /// Get partition lock wait bound as Duration
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.store.lock_wait_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.store.fanout_capacity == 0 {
            return Err(StoreError::Configuration(
                "fanout_capacity must be > 0".to_string(),
            ));
        }

        if self.store.lock_wait_ms == 0 {
            return Err(StoreError::Configuration(
                "lock_wait_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InventorydConfig::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.store.lock_wait_ms, 2000);
        assert_eq!(config.store.fanout_capacity, 16);
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(InventorydConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_listen_addr() {
        let mut config = InventorydConfig::default();
        config.server.listen_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = InventorydConfig::default();
        config.store.fanout_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = InventorydConfig::default();
        assert_eq!(config.keepalive(), Duration::from_secs(5));
        assert_eq!(config.lock_wait(), Duration::from_millis(2000));
    }

    #[test]
    fn test_toml_deserialization_partial() {
        let toml_str = r#"
[server]
listen_addr = "127.0.0.1:8080"

[store]
lock_wait_ms = 500
"#;
        let config: InventorydConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.store.lock_wait_ms, 500);
        // Unspecified values should use defaults
        assert_eq!(config.server.keepalive_secs, 5);
        assert_eq!(config.store.fanout_capacity, 16);
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = InventorydConfig::load_or_default("/nonexistent/inventoryd.conf").unwrap();
        assert_eq!(config.store.fanout_capacity, 16);
    }
}
