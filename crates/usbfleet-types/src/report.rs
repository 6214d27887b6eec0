//! Versioned wire report submitted by endpoint agents
//!
//! A report is a complete point-in-time snapshot of one machine's port set.
//! It only exists in transit between the watcher and the collector; the
//! collector's store is the durable projection.

use serde::{Deserialize, Serialize};

use crate::port::PortRecord;

/// Wire format version carried in every report. The collector rejects
/// versions it does not understand with a structured failure.
pub const REPORT_WIRE_VERSION: u32 = 1;

/// Maximum accepted length for organization id tokens.
const ORG_ID_MAX_LEN: usize = 64;

/// A complete port snapshot for one machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortReport {
    /// Wire format version
    pub version: u32,
    /// Owning organization id token
    pub org_id: String,
    /// Reporting machine id
    pub machine_id: String,
    /// Ordered port records (chain order)
    pub ports: Vec<PortRecord>,
}

impl PortReport {
    /// Build a current-version report
    pub fn new(org_id: impl Into<String>, machine_id: impl Into<String>, ports: Vec<PortRecord>) -> Self {
        Self {
            version: REPORT_WIRE_VERSION,
            org_id: org_id.into(),
            machine_id: machine_id.into(),
            ports,
        }
    }
}

/// Collector acknowledgement for an accepted report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportAck {
    /// Organization the report merged into
    pub org_id: String,
    /// Machine the report described
    pub machine_id: String,
    /// Rows newly created by the merge
    pub inserted: usize,
    /// Rows changed in place by the merge
    pub updated: usize,
    /// Rows re-observed without change
    pub unchanged: usize,
}

/// Structured failure reason for a rejected report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportRejection {
    /// Wire version is not supported by this collector
    UnsupportedVersion { got: u32, expected: u32 },
    /// Organization id is empty or carries invalid characters
    InvalidOrgId(String),
    /// Machine id is empty
    MissingMachineId,
    /// Report carried no port records
    EmptyPortSet,
}

impl std::fmt::Display for ReportRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportRejection::UnsupportedVersion { got, expected } => {
                write!(f, "unsupported report version {} (expected {})", got, expected)
            }
            ReportRejection::InvalidOrgId(org) => write!(f, "invalid organization id: {:?}", org),
            ReportRejection::MissingMachineId => write!(f, "machine id is missing"),
            ReportRejection::EmptyPortSet => write!(f, "report carries no ports"),
        }
    }
}

/// Validate an organization id token: 1-64 chars of `[A-Za-z0-9_-]`.
///
/// Org ids are opaque tokens minted at registration, but they become file
/// names in the store, so the charset is pinned down at the intake boundary.
pub fn validate_org_id(org_id: &str) -> bool {
    !org_id.is_empty()
        && org_id.len() <= ORG_ID_MAX_LEN
        && org_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a report's envelope fields, returning the first problem found.
pub fn validate_report(report: &PortReport) -> Option<ReportRejection> {
    if report.version != REPORT_WIRE_VERSION {
        return Some(ReportRejection::UnsupportedVersion {
            got: report.version,
            expected: REPORT_WIRE_VERSION,
        });
    }
    if !validate_org_id(&report.org_id) {
        return Some(ReportRejection::InvalidOrgId(report.org_id.clone()));
    }
    if report.machine_id.trim().is_empty() {
        return Some(ReportRejection::MissingMachineId);
    }
    if report.ports.is_empty() {
        return Some(ReportRejection::EmptyPortSet);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortRecord;

    fn sample_report() -> PortReport {
        PortReport::new(
            "org-1",
            "PC_0011aabbccdd",
            vec![PortRecord::empty("1-1"), PortRecord::occupied("1-2", "Keyboard")],
        )
    }

    #[test]
    fn test_report_carries_current_version() {
        assert_eq!(sample_report().version, REPORT_WIRE_VERSION);
    }

    #[test]
    fn test_report_serde_round_trip() {
        let report = sample_report();
        let json = serde_json::to_string(&report).unwrap();
        let back: PortReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_validate_org_id_accepts_tokens() {
        assert!(validate_org_id("org-1"));
        assert!(validate_org_id("ORG_42"));
        assert!(validate_org_id("a"));
    }

    #[test]
    fn test_validate_org_id_rejects_bad_tokens() {
        assert!(!validate_org_id(""));
        assert!(!validate_org_id("../etc"));
        assert!(!validate_org_id("org 1"));
        assert!(!validate_org_id(&"x".repeat(65)));
    }

    #[test]
    fn test_validate_report_accepts_sample() {
        assert_eq!(validate_report(&sample_report()), None);
    }

    #[test]
    fn test_validate_report_rejects_version() {
        let mut report = sample_report();
        report.version = 99;
        assert_eq!(
            validate_report(&report),
            Some(ReportRejection::UnsupportedVersion { got: 99, expected: 1 })
        );
    }

    #[test]
    fn test_validate_report_rejects_empty_ports() {
        let mut report = sample_report();
        report.ports.clear();
        assert_eq!(validate_report(&report), Some(ReportRejection::EmptyPortSet));
    }

    #[test]
    fn test_validate_report_rejects_blank_machine() {
        let mut report = sample_report();
        report.machine_id = "  ".to_string();
        assert_eq!(validate_report(&report), Some(ReportRejection::MissingMachineId));
    }

    #[test]
    fn test_rejection_display() {
        let r = ReportRejection::UnsupportedVersion { got: 2, expected: 1 };
        assert_eq!(r.to_string(), "unsupported report version 2 (expected 1)");
    }
}
