//! Configuration file support for usbwatchd
//!
//! Loads and validates watcher configuration from TOML files.
//! Default location: /etc/usbfleet/usbwatchd.conf

use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collector endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Collector base URL for report submission
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Development collector URL selected by --local
    #[serde(default = "default_local_url")]
    pub local_url: String,

    /// Per-attempt request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum delivery attempts per report
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt)
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Watcher behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Debounce window collapsing event bursts, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Heartbeat refresh interval for the process lock, in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Heartbeat age above which a lock counts as stale, in seconds
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_secs: u64,

    /// Resubscription attempts after losing the event channel
    #[serde(default = "default_resubscribe_attempts")]
    pub resubscribe_attempts: u32,

    /// Backoff between resubscription attempts, in milliseconds
    #[serde(default = "default_resubscribe_backoff_ms")]
    pub resubscribe_backoff_ms: u64,

    /// Periodic resync interval in seconds (0 disables)
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
}

/// Enumeration primitive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Command producing the port-tree snapshot on stdout
    #[serde(default = "default_scan_command")]
    pub command: String,

    /// Bound on enumeration runtime, in seconds
    #[serde(default = "default_scan_timeout")]
    pub timeout_secs: u64,
}

/// Complete usbwatchd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdConfig {
    /// Organization this endpoint reports under (installed per-org)
    #[serde(default)]
    pub org_id: String,

    /// Agent state directory (machine id cache, lock file)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Collector endpoint
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Watcher behaviour
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Enumeration primitive
    #[serde(default)]
    pub scan: ScanConfig,
}

// Default functions
fn default_server_url() -> String {
    "https://collector.usbfleet.internal".to_string()
}

fn default_local_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_stale_threshold() -> u64 {
    30
}

fn default_resubscribe_attempts() -> u32 {
    5
}

fn default_resubscribe_backoff_ms() -> u64 {
    1000
}

fn default_resync_interval() -> u64 {
    900
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/usbfleet")
}

fn default_scan_command() -> String {
    "usbtree --report".to_string()
}

fn default_scan_timeout() -> u64 {
    10
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            local_url: default_local_url(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            stale_threshold_secs: default_stale_threshold(),
            resubscribe_attempts: default_resubscribe_attempts(),
            resubscribe_backoff_ms: default_resubscribe_backoff_ms(),
            resync_interval_secs: default_resync_interval(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            command: default_scan_command(),
            timeout_secs: default_scan_timeout(),
        }
    }
}

impl Default for WatchdConfig {
    fn default() -> Self {
        Self {
            org_id: String::new(),
            data_dir: default_data_dir(),
            collector: CollectorConfig::default(),
            watcher: WatcherConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl WatchdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    WatchError::Configuration(format!(
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
            Err(e) => Err(WatchError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default("/etc/usbfleet/usbwatchd.conf")
    }

    /// Path of the process lock file
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("usbwatchd.lock")
    }

    /// Path of the cached machine id file
    pub fn machine_id_path(&self) -> PathBuf {
        self.data_dir.join("machine_id")
    }

    /// Get debounce window as Duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watcher.debounce_ms)
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.watcher.heartbeat_interval_secs)
    }

    /// Get lock staleness threshold as Duration
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.watcher.stale_threshold_secs)
    }

    /// Get periodic resync interval, None when disabled
    pub fn resync_interval(&self) -> Option<Duration> {
        match self.watcher.resync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Get per-attempt request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.collector.request_timeout_secs)
    }

    /// Get enumeration timeout as Duration
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.org_id.is_empty() {
            return Err(WatchError::Configuration(
                "org_id must be set (installed per organization)".to_string(),
            ));
        }

        if !usbfleet_types::validate_org_id(&self.org_id) {
            return Err(WatchError::Configuration(format!(
                "org_id {:?} carries invalid characters",
                self.org_id
            )));
        }

        if self.collector.max_attempts == 0 {
            return Err(WatchError::Configuration(
                "max_attempts must be > 0".to_string(),
            ));
        }

        if self.watcher.stale_threshold_secs <= self.watcher.heartbeat_interval_secs {
            return Err(WatchError::Configuration(
                "stale_threshold_secs must exceed heartbeat_interval_secs".to_string(),
            ));
        }

        if self.scan.command.trim().is_empty() {
            return Err(WatchError::Configuration(
                "scan command must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> WatchdConfig {
        WatchdConfig {
            org_id: "org-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = WatchdConfig::default();
        assert_eq!(config.collector.max_attempts, 5);
        assert_eq!(config.watcher.debounce_ms, 2000);
        assert_eq!(config.scan.timeout_secs, 10);
    }

    #[test]
    fn test_validate_requires_org_id() {
        let config = WatchdConfig::default();
        assert!(config.validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_org_id() {
        let mut config = valid_config();
        config.org_id = "../org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_heartbeat_vs_staleness() {
        let mut config = valid_config();
        config.watcher.stale_threshold_secs = config.watcher.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = valid_config();
        config.collector.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = valid_config();
        assert_eq!(config.debounce(), Duration::from_millis(2000));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.stale_threshold(), Duration::from_secs(30));
        assert_eq!(config.resync_interval(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_resync_disabled_by_zero() {
        let mut config = valid_config();
        config.watcher.resync_interval_secs = 0;
        assert_eq!(config.resync_interval(), None);
    }

    #[test]
    fn test_lock_and_id_paths_under_data_dir() {
        let mut config = valid_config();
        config.data_dir = PathBuf::from("/tmp/fleet");
        assert_eq!(config.lock_path(), PathBuf::from("/tmp/fleet/usbwatchd.lock"));
        assert_eq!(config.machine_id_path(), PathBuf::from("/tmp/fleet/machine_id"));
    }

    #[test]
    fn test_toml_deserialization_partial() {
        let toml_str = r#"
org_id = "org-7"

[collector]
server_url = "https://collector.example.org"
max_attempts = 3

[watcher]
debounce_ms = 500
"#;
        let config: WatchdConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.org_id, "org-7");
        assert_eq!(config.collector.server_url, "https://collector.example.org");
        assert_eq!(config.collector.max_attempts, 3);
        assert_eq!(config.watcher.debounce_ms, 500);
        // Unspecified values should use defaults
        assert_eq!(config.watcher.heartbeat_interval_secs, 5);
        assert_eq!(config.scan.timeout_secs, 10);
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = WatchdConfig::load_or_default("/nonexistent/usbwatchd.conf").unwrap();
        assert_eq!(config.collector.max_attempts, 5);
    }
}
