//! Error types for usbwatchd

use thiserror::Error;

/// Endpoint watcher daemon errors
#[derive(Error, Debug)]
pub enum WatchError {
    /// Enumeration output could not be turned into a report
    #[error("Report build error: {0}")]
    ReportBuild(String),

    /// No hardware source yielded a machine fingerprint
    #[error("Machine identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// Another live instance already holds the process lock
    #[error("Process lock held by live instance (pid {pid})")]
    LockRejected { pid: u32 },

    /// Enumeration primitive failed or timed out
    #[error("Enumeration error: {0}")]
    Enumeration(String),

    /// Report delivery failed after retry exhaustion
    #[error("Transmission error: {0}")]
    Transmission(String),

    /// Device notification channel failed
    #[error("Device event channel error: {0}")]
    EventChannel(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for WatchError {
    fn from(e: serde_json::Error) -> Self {
        WatchError::Configuration(format!("serialization error: {}", e))
    }
}

impl WatchError {
    /// True for the clean single-instance exit path: a second copy of the
    /// daemon finding a live lock is expected, not an operator fault.
    pub fn is_clean_rejection(&self) -> bool {
        matches!(self, WatchError::LockRejected { .. })
    }
}

/// Result type for usbwatchd operations
pub type Result<T> = std::result::Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_report_build() {
        let err = WatchError::ReportBuild("zero ports parsed".to_string());
        assert_eq!(err.to_string(), "Report build error: zero ports parsed");
    }

    #[test]
    fn test_error_display_lock_rejected() {
        let err = WatchError::LockRejected { pid: 4242 };
        assert_eq!(err.to_string(), "Process lock held by live instance (pid 4242)");
    }

    #[test]
    fn test_lock_rejection_is_clean() {
        assert!(WatchError::LockRejected { pid: 1 }.is_clean_rejection());
        assert!(!WatchError::Transmission("timeout".into()).is_clean_rejection());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: WatchError = io.into();
        assert!(matches!(err, WatchError::Io(_)));
    }
}
