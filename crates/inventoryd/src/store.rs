//! Central inventory store and reconciler
//!
//! Holds one partition per organization, each guarded by its own lock, so
//! concurrent submissions from machines of different organizations never
//! contend. A merge upserts port rows by (machine, path): rows are inserted
//! the first time a path is observed and replaced in place afterwards,
//! never deleted by a report (deletion is an administrative action outside
//! this daemon). All lock waits are bounded; a caller that cannot get the
//! partition in time sees a retryable busy error instead of hanging.
//!
//! Durability is a JSON document per partition, rewritten through a temp
//! file and an atomic rename after every merge and reloaded on startup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{error, info, warn};

use usbfleet_types::{
    validate_report, InventoryRow, InventoryTable, PortReport, PortStatus, ReportAck,
};

use crate::error::{Result, StoreError};

/// One persisted port row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPort {
    pub status: PortStatus,
    pub device_name: String,
}

/// One organization's durable inventory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct OrgInventory {
    /// Monotonic merge counter; every accepted report advances it
    seq: u64,
    /// machine id → port path → row
    machines: HashMap<String, HashMap<String, StoredPort>>,
}

/// Result of merging one report.
#[derive(Debug)]
pub struct MergeOutcome {
    /// Acknowledgement returned to the submitting agent
    pub ack: ReportAck,
    /// The organization's full inventory after the merge
    pub table: InventoryTable,
    /// Conflicting duplicate triples seen inside the report (never expected)
    pub conflicts: usize,
}

/// The central store: per-organization partitions behind independent locks.
pub struct InventoryStore {
    data_dir: PathBuf,
    lock_wait: Duration,
    partitions: DashMap<String, Arc<RwLock<OrgInventory>>>,
}

impl InventoryStore {
    /// Open the store, reloading any partitions persisted under `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>, lock_wait: Duration) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let partitions = DashMap::new();
        for entry in fs::read_dir(&data_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(org_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match load_partition(&path) {
                Ok(inventory) => {
                    info!(
                        org_id = %org_id,
                        machines = inventory.machines.len(),
                        seq = inventory.seq,
                        "Reloaded inventory partition"
                    );
                    partitions.insert(org_id.to_string(), Arc::new(RwLock::new(inventory)));
                }
                Err(e) => {
                    // A torn partition must not brick the collector; the
                    // next report from its machines rebuilds it.
                    warn!(path = %path.display(), error = %e, "Skipping unreadable partition");
                }
            }
        }

        Ok(Self {
            data_dir,
            lock_wait,
            partitions,
        })
    }

    /// Get or create the partition handle for an organization.
    fn partition(&self, org_id: &str) -> Arc<RwLock<OrgInventory>> {
        self.partitions
            .entry(org_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(OrgInventory::default())))
            .clone()
    }

    /// Merge a report into its organization's partition.
    ///
    /// Holds the partition write lock for the upsert and the durability
    /// write only; the caller publishes the returned table to subscribers
    /// outside the lock.
    pub async fn merge_report(&self, report: &PortReport) -> Result<MergeOutcome> {
        if let Some(rejection) = validate_report(report) {
            return Err(StoreError::InvalidReport(rejection));
        }

        let partition = self.partition(&report.org_id);
        let mut inventory = timeout(self.lock_wait, partition.write())
            .await
            .map_err(|_| {
                StoreError::Busy(format!(
                    "write lock wait exceeded {:?} for org {}",
                    self.lock_wait, report.org_id
                ))
            })?;

        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut unchanged = 0usize;
        let mut conflicts = 0usize;

        let machine = inventory
            .machines
            .entry(report.machine_id.clone())
            .or_default();

        let mut seen: HashMap<&str, &usbfleet_types::PortRecord> = HashMap::new();
        for port in &report.ports {
            if let Some(prev) = seen.insert(port.path.as_str(), port) {
                if prev.status != port.status || prev.device_name != port.device_name {
                    conflicts += 1;
                    error!(
                        error = %StoreError::MergeConflict {
                            machine_id: report.machine_id.clone(),
                            port_path: port.path.clone(),
                        },
                        "Report carries conflicting data for one port; identity \
                         derivation upstream is not deterministic. Last record wins."
                    );
                }
            }

            let incoming = StoredPort {
                status: port.status,
                device_name: port.device_name.clone(),
            };
            match machine.get_mut(&port.path) {
                Some(existing) if *existing == incoming => unchanged += 1,
                Some(existing) => {
                    *existing = incoming;
                    updated += 1;
                }
                None => {
                    machine.insert(port.path.clone(), incoming);
                    inserted += 1;
                }
            }
        }

        inventory.seq += 1;
        let table = render(&report.org_id, &inventory);
        self.persist(&report.org_id, &inventory)?;

        let ack = ReportAck {
            org_id: report.org_id.clone(),
            machine_id: report.machine_id.clone(),
            inserted,
            updated,
            unchanged,
        };
        info!(
            org_id = %ack.org_id,
            machine_id = %ack.machine_id,
            inserted = inserted,
            updated = updated,
            unchanged = unchanged,
            seq = table.seq,
            "Report merged"
        );

        Ok(MergeOutcome {
            ack,
            table,
            conflicts,
        })
    }

    /// Current inventory table for an organization, `None` if no machine
    /// has ever reported into it.
    pub async fn snapshot(&self, org_id: &str) -> Result<Option<InventoryTable>> {
        let Some(partition) = self.partitions.get(org_id).map(|p| p.value().clone()) else {
            return Ok(None);
        };

        let inventory = timeout(self.lock_wait, partition.read()).await.map_err(|_| {
            StoreError::Busy(format!(
                "read lock wait exceeded {:?} for org {}",
                self.lock_wait, org_id
            ))
        })?;

        Ok(Some(render(org_id, &inventory)))
    }

    /// Organizations with at least one persisted partition.
    pub fn org_ids(&self) -> Vec<String> {
        self.partitions.iter().map(|e| e.key().clone()).collect()
    }

    fn persist(&self, org_id: &str, inventory: &OrgInventory) -> Result<()> {
        let path = self.data_dir.join(format!("{}.json", org_id));
        let tmp = self.data_dir.join(format!("{}.json.tmp", org_id));

        let content = serde_json::to_vec_pretty(inventory)
            .map_err(|e| StoreError::Persistence(format!("serialize {}: {}", org_id, e)))?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn load_partition(path: &Path) -> Result<OrgInventory> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| StoreError::Persistence(format!("parse {}: {}", path.display(), e)))
}

/// Render a partition as the ordered display table.
fn render(org_id: &str, inventory: &OrgInventory) -> InventoryTable {
    let mut rows = Vec::new();
    for (machine_id, ports) in &inventory.machines {
        for (path, port) in ports {
            rows.push(InventoryRow::new(
                org_id,
                machine_id.clone(),
                path.clone(),
                port.status,
                port.device_name.clone(),
            ));
        }
    }
    InventoryTable::new(org_id, inventory.seq, rows)
}
