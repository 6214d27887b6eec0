//! Machine identity derivation
//!
//! The machine id must be computed identically by every run on the same
//! hardware, surviving reboots and reinstalls. It is derived from the first
//! hardware fingerprint source that yields a value, in a fixed fallback
//! order, then cached in the agent data dir so one install keeps one id.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use usbfleet_types::machine_id_from_fingerprint;

use crate::error::{Result, WatchError};

/// Fingerprint sources in fallback order: DMI product UUID, systemd machine
/// id, kernel hostname. Absence of one source never blocks identity
/// assignment; only all three failing does.
pub const DEFAULT_FINGERPRINT_SOURCES: [&str; 3] = [
    "/sys/class/dmi/id/product_uuid",
    "/etc/machine-id",
    "/proc/sys/kernel/hostname",
];

/// Resolves and caches the machine id for this endpoint.
#[derive(Debug, Clone)]
pub struct MachineIdentity {
    sources: Vec<PathBuf>,
    cache_path: PathBuf,
}

impl MachineIdentity {
    /// Identity resolver over the default hardware sources.
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            sources: DEFAULT_FINGERPRINT_SOURCES.iter().map(PathBuf::from).collect(),
            cache_path: cache_path.into(),
        }
    }

    /// Identity resolver over explicit source files.
    pub fn with_sources(cache_path: impl Into<PathBuf>, sources: Vec<PathBuf>) -> Self {
        Self {
            sources,
            cache_path: cache_path.into(),
        }
    }

    /// Resolve the machine id: cached value if present, otherwise derive
    /// from the first readable fingerprint source and persist.
    pub fn resolve(&self) -> Result<String> {
        if let Some(cached) = self.load_cached()? {
            debug!(machine_id = %cached, "Using cached machine id");
            return Ok(cached);
        }

        let fingerprint = self.read_fingerprint()?;
        let machine_id = machine_id_from_fingerprint(&fingerprint);
        self.store_cached(&machine_id)?;
        info!(machine_id = %machine_id, "Derived machine id from hardware fingerprint");
        Ok(machine_id)
    }

    fn load_cached(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.cache_path) {
            Ok(content) => {
                let id = content.trim().to_string();
                if id.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(id))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WatchError::Io(e)),
        }
    }

    fn store_cached(&self, machine_id: &str) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.cache_path, format!("{}\n", machine_id))?;
        Ok(())
    }

    fn read_fingerprint(&self) -> Result<String> {
        for source in &self.sources {
            match read_source(source) {
                Some(value) => {
                    debug!(source = %source.display(), "Fingerprint source selected");
                    return Ok(value);
                }
                None => {
                    warn!(source = %source.display(), "Fingerprint source unavailable, trying next");
                }
            }
        }

        Err(WatchError::IdentityUnavailable(format!(
            "no fingerprint source yielded a value (tried {})",
            self.sources
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

fn read_source(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let value = content.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
