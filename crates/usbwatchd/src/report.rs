//! Port-tree snapshot parsing and report building
//!
//! Turns the enumeration primitive's textual port tree into the ordered port
//! records of a wire report. Each interesting line carries a topological
//! chain descriptor ("1-1-3") naming the position of a hub or port slot:
//!
//! ```text
//! [Hub 1]  Root Hub
//!     [Port 1-1]
//!     [Port 1-2] Keyboard
//!     [Hub 1-3]  4-Port Hub
//!         [Port 1-3-1] USB Drive
//!         [Port 1-3-2]
//! ```
//!
//! A record is emitted for every leaf port slot whether or not a device is
//! attached, keyed by the chain path alone, so the same physical socket maps
//! to the same record across scans. Lines that do not parse are skipped;
//! a snapshot that yields zero ports signals an upstream format change.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use usbfleet_types::{chain_sort_key, PortRecord, PortReport};

use crate::error::{Result, WatchError};

/// Port slot line: `[Port 1-2] Keyboard` (device name optional).
static PORT_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*\[port\s+(\d+(?:-\d+)*)\]\s*(.*)$").expect("Invalid regex pattern")
});

/// Hub line: `[Hub 1-3] 4-Port Hub`.
static HUB_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*\[hub\s+(\d+(?:-\d+)*)\]").expect("Invalid regex pattern")
});

/// Device-name strings that mean "nothing attached".
const EMPTY_MARKERS: [&str; 4] = ["---", "[empty]", "(none)", "no device"];

/// One parsed snapshot line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Hub { chain: String },
    Port { chain: String, device: Option<String> },
}

impl Node {
    fn chain(&self) -> &str {
        match self {
            Node::Hub { chain } => chain,
            Node::Port { chain, .. } => chain,
        }
    }
}

/// Normalize UTF-16-derived "wide spaced" lines (`U S B   P o r t`).
///
/// Some enumeration builds interleave every character with a space. A line
/// where most odd positions are spaces is collapsed by dropping them.
fn normalize_wide_spacing(content: &str) -> String {
    let normalized: Vec<String> = content
        .lines()
        .map(|line| {
            if line.chars().count() > 4 {
                let odd: Vec<char> = line.chars().skip(1).step_by(2).collect();
                let spaces = odd.iter().filter(|c| **c == ' ').count();
                if !odd.is_empty() && spaces * 10 > odd.len() * 7 {
                    return line.chars().step_by(2).collect();
                }
            }
            line.to_string()
        })
        .collect();
    normalized.join("\n")
}

fn parse_line(line: &str) -> Option<Node> {
    if let Some(caps) = PORT_LINE_RE.captures(line) {
        let chain = caps[1].to_string();
        let label = caps[2].trim();
        let device = if label.is_empty()
            || EMPTY_MARKERS
                .iter()
                .any(|m| label.eq_ignore_ascii_case(m))
        {
            None
        } else {
            Some(label.to_string())
        };
        return Some(Node::Port { chain, device });
    }

    if let Some(caps) = HUB_LINE_RE.captures(line) {
        return Some(Node::Hub {
            chain: caps[1].to_string(),
        });
    }

    None
}

/// Parse a snapshot into ordered port records.
///
/// Only leaf slots produce records: a port whose chain is extended by any
/// other node is itself acting as a hub (a compound device enumerating
/// children) and its children are the physical slots of interest.
pub fn parse_snapshot(snapshot: &str) -> Result<Vec<PortRecord>> {
    let content = normalize_wide_spacing(snapshot);

    let mut nodes: Vec<Node> = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(node) => nodes.push(node),
            None => {
                debug!(line = %line.trim(), "Skipping unparsable snapshot line");
            }
        }
    }

    let mut records: Vec<PortRecord> = Vec::new();
    for node in &nodes {
        let Node::Port { chain, device } = node else {
            continue;
        };
        let prefix = format!("{}-", chain);
        let has_children = nodes
            .iter()
            .any(|other| other.chain() != chain.as_str() && other.chain().starts_with(&prefix));
        if has_children {
            continue;
        }

        let record = match device {
            Some(name) => PortRecord::occupied(chain.clone(), name.clone()),
            None => PortRecord::empty(chain.clone()),
        };
        // Re-observation of the same chain replaces the earlier record.
        match records.iter_mut().find(|r| r.path == record.path) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    records.sort_by(|a, b| chain_sort_key(&a.path).cmp(&chain_sort_key(&b.path)));

    if records.is_empty() {
        return Err(WatchError::ReportBuild(if snapshot.trim().is_empty() {
            "enumeration produced no output".to_string()
        } else {
            "zero ports parsed from non-empty snapshot (format change upstream?)".to_string()
        }));
    }

    Ok(records)
}

/// Build a complete wire report for this machine from a snapshot.
pub fn build_report(org_id: &str, machine_id: &str, snapshot: &str) -> Result<PortReport> {
    let ports = parse_snapshot(snapshot)?;
    Ok(PortReport::new(org_id, machine_id, ports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbfleet_types::{PortStatus, EMPTY_PORT_LABEL};

    const SAMPLE: &str = "\
[Hub 1]  Root Hub
    [Port 1-1]
    [Port 1-2] Keyboard
";

    #[test]
    fn test_parse_example_snapshot() {
        let records = parse_snapshot(SAMPLE).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, "1-1");
        assert_eq!(records[0].status, PortStatus::Free);
        assert_eq!(records[0].device_name, EMPTY_PORT_LABEL);
        assert_eq!(records[1].path, "1-2");
        assert_eq!(records[1].status, PortStatus::Secured);
        assert_eq!(records[1].device_name, "Keyboard");
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = parse_snapshot(SAMPLE).unwrap();
        let b = parse_snapshot(SAMPLE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_hub_emits_leaves_only() {
        let snapshot = "\
[Hub 1]
    [Port 1-1] Composite Dock
        [Port 1-1-1] Mouse
        [Port 1-1-2]
    [Port 1-2]
";
        let records = parse_snapshot(snapshot).unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        // 1-1 has children, so it is structure, not a slot.
        assert_eq!(paths, vec!["1-1-1", "1-1-2", "1-2"]);
    }

    #[test]
    fn test_records_sorted_numerically() {
        let snapshot = "\
[Port 1-10] Webcam
[Port 1-2] Keyboard
[Port 1-1]
";
        let records = parse_snapshot(snapshot).unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["1-1", "1-2", "1-10"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let snapshot = "\
### enumeration 4.1 ###
[Port 1-1] Keyboard
[Port ???] garbage
totally unrelated noise
[Port 1-2]
";
        let records = parse_snapshot(snapshot).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_empty_markers_mean_unoccupied() {
        for marker in ["---", "[Empty]", "(none)", "No device"] {
            let snapshot = format!("[Port 1-1] {}\n", marker);
            let records = parse_snapshot(&snapshot).unwrap();
            assert_eq!(records[0].status, PortStatus::Free, "marker {:?}", marker);
            assert_eq!(records[0].device_name, EMPTY_PORT_LABEL);
        }
    }

    #[test]
    fn test_zero_ports_from_nonempty_input_fails() {
        let err = parse_snapshot("no ports here\njust text\n").unwrap_err();
        assert!(matches!(err, WatchError::ReportBuild(_)));
    }

    #[test]
    fn test_empty_input_fails() {
        let err = parse_snapshot("   \n").unwrap_err();
        assert!(matches!(err, WatchError::ReportBuild(_)));
    }

    #[test]
    fn test_wide_spacing_normalization() {
        let snapshot = "[ P o r t   1 - 2 ]   K e y b o a r d";
        let records = parse_snapshot(snapshot).unwrap();
        assert_eq!(records[0].path, "1-2");
        assert_eq!(records[0].device_name, "Keyboard");
    }

    #[test]
    fn test_duplicate_chain_keeps_last_observation() {
        let snapshot = "\
[Port 1-1] Keyboard
[Port 1-1] Mouse
";
        let records = parse_snapshot(snapshot).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].device_name, "Mouse");
    }

    #[test]
    fn test_same_path_across_device_churn() {
        let plugged = parse_snapshot("[Port 1-4] USB Drive\n").unwrap();
        let unplugged = parse_snapshot("[Port 1-4]\n").unwrap();
        let replugged = parse_snapshot("[Port 1-4] USB Drive\n").unwrap();
        assert_eq!(plugged[0].path, unplugged[0].path);
        assert_eq!(unplugged[0].path, replugged[0].path);
        assert_eq!(plugged[0].status, PortStatus::Secured);
        assert_eq!(unplugged[0].status, PortStatus::Free);
        assert_eq!(replugged[0].status, PortStatus::Secured);
    }

    #[test]
    fn test_build_report_envelope() {
        let report = build_report("org-1", "PC_0011aabbccdd", SAMPLE).unwrap();
        assert_eq!(report.org_id, "org-1");
        assert_eq!(report.machine_id, "PC_0011aabbccdd");
        assert_eq!(report.ports.len(), 2);
    }
}
