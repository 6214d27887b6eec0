//! Device attach/detach event sources
//!
//! The OS notification mechanism is an external collaborator. The watcher
//! only depends on the `DeviceEventSource` capability: subscribe and get a
//! stream of typed attach/detach events, resubscribable after channel loss.
//! The shipped binding shells out to `udevadm monitor`; tests use a scripted
//! source.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, WatchError};

/// Kind of device notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceAction {
    /// Device attached
    Attach,
    /// Device detached
    Detach,
}

/// Device class tag carried by a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    /// USB subsystem device
    Usb,
    /// Any other subsystem
    Other(String),
}

/// One discrete attach/detach notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceEvent {
    /// What happened
    pub action: DeviceAction,
    /// Device class the OS tagged the event with
    pub class: DeviceClass,
    /// OS device path, informational only
    pub device: String,
}

impl DeviceEvent {
    /// True for the events the watcher reacts to.
    pub fn is_usb(&self) -> bool {
        self.class == DeviceClass::Usb
    }
}

/// Capability interface over the OS notification mechanism.
///
/// `subscribe` yields a lazy, unbounded sequence of events; when the
/// returned channel closes, callers may subscribe again (restartable).
#[async_trait]
pub trait DeviceEventSource: Send + Sync {
    async fn subscribe(&self) -> Result<mpsc::Receiver<DeviceEvent>>;
}

/// Channel depth for event delivery. Device bursts are short; the debounce
/// window downstream absorbs the rest.
const EVENT_CHANNEL_DEPTH: usize = 64;

/// `udevadm monitor` subprocess binding.
///
/// Parses monitor lines of the form
/// `UDEV  [1234.5678] add  /devices/.../usb1/1-2 (usb)`.
#[derive(Debug, Clone, Default)]
pub struct UdevEventSource;

impl UdevEventSource {
    pub fn new() -> Self {
        Self
    }

    /// Parse one monitor line into an event.
    pub fn parse_line(line: &str) -> Option<DeviceEvent> {
        if !line.starts_with("UDEV") && !line.starts_with("KERNEL") {
            return None;
        }

        let mut parts = line.split_whitespace();
        let _origin = parts.next()?;
        let _timestamp = parts.next()?;
        let action = match parts.next()? {
            "add" => DeviceAction::Attach,
            "remove" => DeviceAction::Detach,
            _ => return None,
        };
        let device = parts.next()?.to_string();
        let class = match parts.next() {
            Some(subsystem) => {
                let name = subsystem.trim_matches(|c| c == '(' || c == ')');
                if name.eq_ignore_ascii_case("usb") {
                    DeviceClass::Usb
                } else {
                    DeviceClass::Other(name.to_string())
                }
            }
            None => return None,
        };

        Some(DeviceEvent { action, class, device })
    }
}

#[async_trait]
impl DeviceEventSource for UdevEventSource {
    async fn subscribe(&self) -> Result<mpsc::Receiver<DeviceEvent>> {
        let mut child = Command::new("udevadm")
            .args(["monitor", "--udev", "--subsystem-match=usb"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WatchError::EventChannel(format!("failed to spawn udevadm: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WatchError::EventChannel("udevadm stdout unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = UdevEventSource::parse_line(&line) {
                            debug!(?event, "Device event");
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        warn!("udevadm monitor stream ended");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "udevadm monitor read failed");
                        break;
                    }
                }
            }
            // Receiver sees the channel close and resubscribes.
            drop(child);
        });

        Ok(rx)
    }
}

/// Scripted event source for tests: the first subscription replays a fixed
/// event list and then closes the channel; later subscriptions fail, which
/// exercises the bounded-resubscription path.
#[derive(Debug, Default)]
pub struct ScriptedEventSource {
    events: Vec<DeviceEvent>,
    exhausted: std::sync::atomic::AtomicBool,
}

impl ScriptedEventSource {
    pub fn new(events: Vec<DeviceEvent>) -> Self {
        Self {
            events,
            exhausted: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DeviceEventSource for ScriptedEventSource {
    async fn subscribe(&self) -> Result<mpsc::Receiver<DeviceEvent>> {
        if self.exhausted.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(WatchError::EventChannel(
                "scripted source already consumed".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH.max(self.events.len() + 1));
        for event in &self.events {
            // Depth covers the full script; send cannot block here.
            let _ = tx.try_send(event.clone());
        }
        Ok(rx)
    }
}
