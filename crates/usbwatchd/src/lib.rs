//! Endpoint USB Port Watcher Daemon
//!
//! Watches a machine's USB topology and keeps the central collector current:
//! subscribes to device attach/detach notifications, debounces bursts,
//! enumerates the physical port tree through an external tool, builds a
//! stable keyed report and delivers it with retry. A heartbeat-bearing lock
//! file enforces a single instance per machine.

pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod identity;
pub mod report;
pub mod scan;
pub mod transmit;
pub mod watcher;

pub use config::{CollectorConfig, ScanConfig, WatchdConfig, WatcherConfig};
pub use error::{Result, WatchError};
pub use events::{
    DeviceAction, DeviceClass, DeviceEvent, DeviceEventSource, ScriptedEventSource,
    UdevEventSource,
};
pub use guard::{LockRecord, ProcessGuard};
pub use identity::{MachineIdentity, DEFAULT_FINGERPRINT_SOURCES};
pub use report::{build_report, parse_snapshot};
pub use scan::{run_enumeration, ScanOutput};
pub use transmit::{backoff_delay, HttpTransmitter, ReportTransmitter, REPORT_ROUTE};
pub use watcher::{Watcher, WatcherState};
