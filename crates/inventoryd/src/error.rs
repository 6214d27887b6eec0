//! Error types for inventoryd

use thiserror::Error;
use usbfleet_types::ReportRejection;

/// Central store and collector errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Lock wait exceeded its bound; callers may retry
    #[error("Store busy: {0}")]
    Busy(String),

    /// One report carried conflicting data for the same port triple.
    /// Upsert-by-key makes this impossible unless identity derivation
    /// diverged somewhere upstream.
    #[error("Merge conflict for machine {machine_id} port {port_path}")]
    MergeConflict {
        machine_id: String,
        port_path: String,
    },

    /// Report failed envelope validation
    #[error("Invalid report: {0}")]
    InvalidReport(ReportRejection),

    /// Persisted partition could not be written or read back
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for conditions a client should simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

/// Result type for inventoryd operations
pub type Result<T> = std::result::Result<T, StoreError>;
