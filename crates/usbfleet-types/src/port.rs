//! Port records and their occupancy status
//!
//! A port is identified by the topological chain path of the physical socket
//! (e.g. "1-1-3"), never by whatever device currently occupies it. The same
//! socket therefore maps to the same record across scans, reboots and device
//! churn.

use serde::{Deserialize, Serialize};

/// Device name recorded for an unoccupied port slot.
pub const EMPTY_PORT_LABEL: &str = "Empty USB Port";

/// Occupancy status of a physical port slot.
///
/// `Secured` records that some device is present; whether that device is
/// *allowed* is external policy and not modelled here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortStatus {
    /// No device attached
    Free,
    /// A device is attached
    Secured,
}

impl PortStatus {
    /// Convert status to string for table rendering
    pub fn as_str(&self) -> &'static str {
        match self {
            PortStatus::Free => "Free",
            PortStatus::Secured => "Secured",
        }
    }
}

/// One physical port slot as observed by a scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    /// Topological chain path (e.g. "1-2", "1-1-3")
    pub path: String,
    /// Occupancy status
    pub status: PortStatus,
    /// Attached device display name, or the empty-port sentinel
    pub device_name: String,
}

impl PortRecord {
    /// Record for a port currently holding a device
    pub fn occupied(path: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: PortStatus::Secured,
            device_name: device_name.into(),
        }
    }

    /// Record for an empty port slot
    pub fn empty(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: PortStatus::Free,
            device_name: EMPTY_PORT_LABEL.to_string(),
        }
    }
}

/// Numeric sort key for a chain path.
///
/// Chains sort by their dash-separated components as integers, so "1-2"
/// orders before "1-10". Components that fail to parse sort last, keeping
/// malformed paths out of the way without dropping them.
pub fn chain_sort_key(chain: &str) -> Vec<u32> {
    let parsed: Option<Vec<u32>> = chain.split('-').map(|c| c.parse().ok()).collect();
    parsed.unwrap_or_else(|| vec![u32::MAX])
}
