//! Single-instance process guard
//!
//! An exclusive lock file enforces one watcher per machine. The file records
//! the owner's PID, a unique owner token and a heartbeat timestamp; a fresh
//! heartbeat means a live instance holds the lock, a stale one means the
//! prior instance crashed and the lock can be reclaimed. Acquisition is a
//! single atomic create-if-absent, never check-then-create, so two
//! installers racing to start resolve to exactly one winner.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, WatchError};

/// Wait for competing reclaim renames to land before verifying ownership.
const RECLAIM_SETTLE: Duration = Duration::from_millis(50);

/// On-disk lock record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    /// PID of the owning process
    pub pid: u32,
    /// Unique token distinguishing owners that share a PID across restarts
    pub owner: String,
    /// Last heartbeat refresh
    pub heartbeat: DateTime<Utc>,
}

impl LockRecord {
    fn new(pid: u32, owner: String) -> Self {
        Self {
            pid,
            owner,
            heartbeat: Utc::now(),
        }
    }

    /// Heartbeat age relative to now.
    pub fn heartbeat_age(&self) -> Duration {
        (Utc::now() - self.heartbeat).to_std().unwrap_or(Duration::ZERO)
    }

    /// True when the heartbeat is recent enough to prove a live owner.
    pub fn is_fresh(&self, stale_threshold: Duration) -> bool {
        self.heartbeat_age() < stale_threshold
    }
}

/// Held process lock. Refreshing the heartbeat is the owner's duty; the
/// lock file is removed on release.
#[derive(Debug)]
pub struct ProcessGuard {
    path: PathBuf,
    record: LockRecord,
}

impl ProcessGuard {
    /// Try to take the process lock at `path`.
    ///
    /// Returns `LockRejected` when another instance's heartbeat is fresh.
    /// A stale lock is reclaimed; after writing, the file is re-read and the
    /// owner token compared, so concurrent reclaimers also resolve to one
    /// winner.
    pub fn acquire(path: impl Into<PathBuf>, stale_threshold: Duration) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let record = LockRecord::new(std::process::id(), Uuid::new_v4().to_string());

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(serde_json::to_string(&record)?.as_bytes())?;
                file.sync_all()?;
                info!(path = %path.display(), pid = record.pid, "Acquired process lock");
                Ok(Self { path, record })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Self::contend(path, stale_threshold, record)
            }
            Err(e) => Err(WatchError::Io(e)),
        }
    }

    /// Handle an existing lock file: reject if live, reclaim if stale.
    fn contend(path: PathBuf, stale_threshold: Duration, record: LockRecord) -> Result<Self> {
        match read_lock(&path) {
            Some(existing) if existing.is_fresh(stale_threshold) => {
                debug!(
                    path = %path.display(),
                    holder_pid = existing.pid,
                    age_secs = existing.heartbeat_age().as_secs(),
                    "Lock held by live instance"
                );
                Err(WatchError::LockRejected { pid: existing.pid })
            }
            None if file_age(&path).map_or(true, |age| age < stale_threshold) => {
                // Unreadable but recently touched: a winner may still be
                // mid-write between create and first flush. Treat as live.
                debug!(path = %path.display(), "Lock file unreadable but fresh, rejecting");
                Err(WatchError::LockRejected { pid: 0 })
            }
            existing => {
                match &existing {
                    Some(stale) => warn!(
                        path = %path.display(),
                        holder_pid = stale.pid,
                        age_secs = stale.heartbeat_age().as_secs(),
                        "Reclaiming stale process lock"
                    ),
                    None => warn!(
                        path = %path.display(),
                        "Reclaiming unreadable stale process lock"
                    ),
                }

                write_atomic(&path, &record)?;

                // Another reclaimer may rename over ours; let concurrent
                // writes land, then whoever's token survives owns the lock.
                std::thread::sleep(RECLAIM_SETTLE);
                match read_lock(&path) {
                    Some(current) if current.owner == record.owner => {
                        info!(path = %path.display(), pid = record.pid, "Reclaimed process lock");
                        Ok(Self { path, record })
                    }
                    Some(current) => Err(WatchError::LockRejected { pid: current.pid }),
                    None => Err(WatchError::Configuration(format!(
                        "lock file {} unreadable after reclaim",
                        path.display()
                    ))),
                }
            }
        }
    }

    /// Refresh the heartbeat timestamp. Only the owner calls this; a
    /// mismatching owner token means the lock was lost (reclaimed after a
    /// long stall) and is surfaced as rejection.
    pub fn refresh_heartbeat(&mut self) -> Result<()> {
        match read_lock(&self.path) {
            Some(current) if current.owner == self.record.owner => {
                self.record.heartbeat = Utc::now();
                write_atomic(&self.path, &self.record)
            }
            Some(current) => Err(WatchError::LockRejected { pid: current.pid }),
            None => {
                // Lock file vanished; re-assert ownership.
                warn!(path = %self.path.display(), "Lock file missing, rewriting");
                self.record.heartbeat = Utc::now();
                write_atomic(&self.path, &self.record)
            }
        }
    }

    /// Current lock record.
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, removing the file if still owned.
    pub fn release(self) {
        if let Some(current) = read_lock(&self.path) {
            if current.owner == self.record.owner {
                let _ = fs::remove_file(&self.path);
                info!(path = %self.path.display(), "Released process lock");
            }
        }
    }
}

fn read_lock(path: &Path) -> Option<LockRecord> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn file_age(path: &Path) -> Option<Duration> {
    fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}

/// Write the record through a sibling temp file and atomic rename, so a
/// crashed writer never leaves a torn lock file behind.
fn write_atomic(path: &Path, record: &LockRecord) -> Result<()> {
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, serde_json::to_string(record)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STALE: Duration = Duration::from_secs(30);

    #[test]
    fn test_acquire_fresh_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");
        let guard = ProcessGuard::acquire(&path, STALE).unwrap();
        assert!(path.exists());
        assert_eq!(guard.record().pid, std::process::id());
    }

    #[test]
    fn test_second_acquire_rejected_while_live() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");
        let _guard = ProcessGuard::acquire(&path, STALE).unwrap();

        let err = ProcessGuard::acquire(&path, STALE).unwrap_err();
        assert!(matches!(err, WatchError::LockRejected { .. }));
    }

    #[test]
    fn test_stale_lock_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");

        let stale = LockRecord {
            pid: 99999,
            owner: "dead-instance".to_string(),
            heartbeat: Utc::now() - chrono::Duration::seconds(120),
        };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let guard = ProcessGuard::acquire(&path, STALE).unwrap();
        assert_eq!(guard.record().pid, std::process::id());
    }

    #[test]
    fn test_corrupt_fresh_lock_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");
        // A just-touched unreadable file could be a winner mid-write.
        fs::write(&path, "not json").unwrap();

        let err = ProcessGuard::acquire(&path, STALE).unwrap_err();
        assert!(matches!(err, WatchError::LockRejected { .. }));
    }

    #[test]
    fn test_corrupt_old_lock_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");
        fs::write(&path, "not json").unwrap();

        // With a zero staleness threshold the unreadable file counts as old.
        let guard = ProcessGuard::acquire(&path, Duration::ZERO);
        assert!(guard.is_ok());
    }

    #[test]
    fn test_heartbeat_refresh_advances_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");
        let mut guard = ProcessGuard::acquire(&path, STALE).unwrap();

        let before = guard.record().heartbeat;
        std::thread::sleep(Duration::from_millis(20));
        guard.refresh_heartbeat().unwrap();
        assert!(guard.record().heartbeat > before);

        let on_disk = read_lock(&path).unwrap();
        assert_eq!(on_disk.heartbeat, guard.record().heartbeat);
    }

    #[test]
    fn test_heartbeat_detects_lost_ownership() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");
        let mut guard = ProcessGuard::acquire(&path, STALE).unwrap();

        // Another instance reclaims behind our back.
        let thief = LockRecord::new(4242, "thief".to_string());
        fs::write(&path, serde_json::to_string(&thief).unwrap()).unwrap();

        let err = guard.refresh_heartbeat().unwrap_err();
        assert!(matches!(err, WatchError::LockRejected { pid: 4242 }));
    }

    #[test]
    fn test_release_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");
        let guard = ProcessGuard::acquire(&path, STALE).unwrap();
        guard.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usbwatchd.lock");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let path = path.clone();
            handles.push(std::thread::spawn(move || {
                ProcessGuard::acquire(&path, STALE).is_ok()
            }));
        }

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_record_freshness() {
        let record = LockRecord::new(1, "o".to_string());
        assert!(record.is_fresh(STALE));

        let old = LockRecord {
            heartbeat: Utc::now() - chrono::Duration::seconds(60),
            ..record
        };
        assert!(!old.is_fresh(STALE));
    }
}
