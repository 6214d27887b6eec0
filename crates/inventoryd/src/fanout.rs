//! Live inventory fan-out
//!
//! One broadcast channel per organization. Every subscriber owns an
//! independent bounded queue: a slow consumer lags and loses its oldest
//! buffered snapshots in favor of the newest, and never blocks delivery to
//! anyone else. Within one subscription, snapshots arrive in the order the
//! reconciler produced them (with gaps where overflow dropped some); no
//! ordering is promised across organizations.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use usbfleet_types::InventoryTable;

/// Snapshots travel by shared pointer; every subscriber sees the same
/// immutable table.
pub type InventoryUpdate = Arc<InventoryTable>;

/// Per-organization broadcast registry.
pub struct FanoutHub {
    capacity: usize,
    channels: DashMap<String, broadcast::Sender<InventoryUpdate>>,
}

impl FanoutHub {
    /// Hub whose per-subscriber queues hold up to `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
        }
    }

    fn channel(&self, org_id: &str) -> broadcast::Sender<InventoryUpdate> {
        self.channels
            .entry(org_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a merged snapshot to the organization's subscribers.
    ///
    /// With no subscribers connected the snapshot is simply dropped; a
    /// reconnecting viewer starts from the current store state anyway.
    pub fn publish(&self, table: InventoryTable) {
        let org_id = table.org_id.clone();
        let sender = self.channel(&org_id);
        match sender.send(Arc::new(table)) {
            Ok(receivers) => {
                debug!(org_id = %org_id, receivers = receivers, "Snapshot published");
            }
            Err(_) => {
                debug!(org_id = %org_id, "No subscribers, snapshot dropped");
            }
        }
    }

    /// Open a subscription to one organization's snapshot stream.
    pub fn subscribe(&self, org_id: &str) -> broadcast::Receiver<InventoryUpdate> {
        self.channel(org_id).subscribe()
    }

    /// Currently connected subscribers for an organization.
    pub fn subscriber_count(&self, org_id: &str) -> usize {
        self.channels
            .get(org_id)
            .map(|c| c.receiver_count())
            .unwrap_or(0)
    }
}
