//! Inventory tables served to dashboard viewers
//!
//! The collector renders each organization's inventory as an ordered table
//! (stable headers, rows ordered by machine then chain) so viewers can
//! replace the whole table on every update instead of patching cells.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::port_display_id;
use crate::port::{chain_sort_key, PortStatus};

/// Stable column order for inventory tables.
pub const INVENTORY_HEADERS: [&str; 6] = [
    "org_id",
    "machine_id",
    "port_id",
    "port_path",
    "status",
    "device_name",
];

/// One rendered inventory row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub org_id: String,
    pub machine_id: String,
    pub port_id: String,
    pub port_path: String,
    pub status: PortStatus,
    pub device_name: String,
}

impl InventoryRow {
    /// Build a row, deriving the stable port display id.
    pub fn new(
        org_id: impl Into<String>,
        machine_id: impl Into<String>,
        port_path: impl Into<String>,
        status: PortStatus,
        device_name: impl Into<String>,
    ) -> Self {
        let machine_id = machine_id.into();
        let port_path = port_path.into();
        let port_id = port_display_id(&machine_id, &port_path);
        Self {
            org_id: org_id.into(),
            machine_id,
            port_id,
            port_path,
            status,
            device_name: device_name.into(),
        }
    }

    /// Render as cells in header order.
    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.org_id.clone(),
            self.machine_id.clone(),
            self.port_id.clone(),
            self.port_path.clone(),
            self.status.as_str().to_string(),
            self.device_name.clone(),
        ]
    }
}

/// A full inventory snapshot for one organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTable {
    /// Organization this table belongs to
    pub org_id: String,
    /// Monotonic merge sequence the snapshot reflects
    pub seq: u64,
    /// Snapshot generation time, the viewer's staleness indicator
    pub generated_at: DateTime<Utc>,
    /// Column names in render order
    pub headers: Vec<String>,
    /// Rows in (machine id, chain) order
    pub rows: Vec<InventoryRow>,
}

impl InventoryTable {
    /// Build a table from unordered rows, imposing the stable ordering.
    pub fn new(org_id: impl Into<String>, seq: u64, mut rows: Vec<InventoryRow>) -> Self {
        rows.sort_by(|a, b| {
            a.machine_id
                .cmp(&b.machine_id)
                .then_with(|| chain_sort_key(&a.port_path).cmp(&chain_sort_key(&b.port_path)))
        });
        Self {
            org_id: org_id.into(),
            seq,
            generated_at: Utc::now(),
            headers: INVENTORY_HEADERS.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    /// True when no machine has reported into this organization yet.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
