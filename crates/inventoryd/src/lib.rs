//! Central Inventory Collector Daemon
//!
//! Accepts port reports from endpoint watchers, reconciles them into
//! durable per-organization inventory partitions and streams every change
//! to connected dashboard viewers over SSE.

pub mod api;
pub mod config;
pub mod error;
pub mod fanout;
pub mod store;

pub use api::{router, AppState};
pub use config::{InventorydConfig, ServerConfig, StoreConfig};
pub use error::{Result, StoreError};
pub use fanout::{FanoutHub, InventoryUpdate};
pub use store::{InventoryStore, MergeOutcome, StoredPort};
