//! Shared data model for the usbfleet port inventory pipeline
//!
//! Defines the port records produced by endpoint agents, the versioned wire
//! report they submit, the inventory tables the collector serves, and the
//! deterministic identifier scheme both sides rely on for idempotent upserts.

pub mod api;
pub mod ids;
pub mod inventory;
pub mod port;
pub mod report;

pub use api::{ApiErrorBody, ApiResponse};
pub use ids::{machine_id_from_fingerprint, port_display_id};
pub use inventory::{InventoryRow, InventoryTable, INVENTORY_HEADERS};
pub use port::{chain_sort_key, PortRecord, PortStatus, EMPTY_PORT_LABEL};
pub use report::{
    validate_org_id, validate_report, PortReport, ReportAck, ReportRejection, REPORT_WIRE_VERSION,
};
