//! Enumeration primitive invocation
//!
//! The port-tree snapshot comes from an external tool that takes no input
//! and prints the topology as text. The tool is expected to complete within
//! a bounded time or the scan is treated as failed.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, WatchError};

/// Result of one enumeration run.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    /// The exit code of the tool (0 = success)
    pub exit_code: i32,
    /// The captured port-tree snapshot
    pub snapshot: String,
}

impl ScanOutput {
    /// Returns true if the tool exited cleanly.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run the enumeration command and capture its snapshot within `timeout`.
///
/// The command string runs through `/bin/sh -c` so packaged wrappers can use
/// pipes and arguments freely.
pub async fn run_enumeration(command: &str, timeout: Duration) -> Result<ScanOutput> {
    debug!(command = %command, "Running enumeration primitive");

    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(WatchError::Enumeration(format!(
                "failed to spawn {:?}: {}",
                command, e
            )));
        }
        Err(_) => {
            return Err(WatchError::Enumeration(format!(
                "{:?} did not complete within {:?}",
                command, timeout
            )));
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let snapshot = String::from_utf8_lossy(&output.stdout).to_string();

    if exit_code != 0 {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            command = %command,
            exit_code = exit_code,
            stderr = %stderr.trim(),
            "Enumeration tool exited non-zero"
        );
    }

    Ok(ScanOutput { exit_code, snapshot })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_enumeration_captures_stdout() {
        let out = run_enumeration("echo '[Port 1-1]'", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.snapshot.trim(), "[Port 1-1]");
    }

    #[tokio::test]
    async fn test_run_enumeration_reports_exit_code() {
        let out = run_enumeration("exit 3", Duration::from_secs(5)).await.unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_run_enumeration_times_out() {
        let err = run_enumeration("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Enumeration(_)));
    }
}
