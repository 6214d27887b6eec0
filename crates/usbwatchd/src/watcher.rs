//! Endpoint watcher state machine
//!
//! Drives the `Idle → Armed → Reporting → Armed` loop: waits for USB-class
//! device events, collapses bursts through a debounce window, runs one
//! enumeration + report + delivery cycle per window, and keeps the process
//! lock heartbeat fresh while doing so. Losing the event channel triggers
//! bounded resubscription; exhausting it is fatal to this instance and left
//! to the supervising launcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

use crate::config::WatchdConfig;
use crate::error::{Result, WatchError};
use crate::events::{DeviceEvent, DeviceEventSource};
use crate::guard::ProcessGuard;
use crate::report::build_report;
use crate::scan::run_enumeration;
use crate::transmit::{backoff_delay, ReportTransmitter};

/// Watcher lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherState {
    /// Not yet subscribed to device events
    Idle,
    /// Subscribed, waiting for a device event
    Armed,
    /// Running an enumeration/report/delivery cycle
    Reporting,
}

/// The endpoint watcher.
pub struct Watcher<S, T> {
    source: S,
    transmitter: T,
    org_id: String,
    machine_id: String,
    scan_command: String,
    scan_timeout: Duration,
    debounce: Duration,
    resubscribe_attempts: u32,
    resubscribe_backoff: Duration,
    resync_interval: Option<Duration>,
    state: WatcherState,
    cycles_run: u64,
    reports_delivered: u64,
}

impl<S, T> Watcher<S, T>
where
    S: DeviceEventSource,
    T: ReportTransmitter,
{
    /// Build a watcher from configuration and a resolved machine id.
    pub fn new(config: &WatchdConfig, machine_id: String, source: S, transmitter: T) -> Self {
        Self {
            source,
            transmitter,
            org_id: config.org_id.clone(),
            machine_id,
            scan_command: config.scan.command.clone(),
            scan_timeout: config.scan_timeout(),
            debounce: config.debounce(),
            resubscribe_attempts: config.watcher.resubscribe_attempts,
            resubscribe_backoff: Duration::from_millis(config.watcher.resubscribe_backoff_ms),
            resync_interval: config.resync_interval(),
            state: WatcherState::Idle,
            cycles_run: 0,
            reports_delivered: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Report cycles attempted so far.
    pub fn cycles_run(&self) -> u64 {
        self.cycles_run
    }

    /// Reports the collector acknowledged so far.
    pub fn reports_delivered(&self) -> u64 {
        self.reports_delivered
    }

    /// Run one enumeration → build → deliver cycle.
    ///
    /// Per-cycle failures are terminal only for this cycle: a bad snapshot
    /// or an exhausted delivery is logged and superseded by the next cycle.
    pub async fn report_once(&mut self) {
        self.state = WatcherState::Reporting;
        self.cycles_run += 1;

        let outcome = self.try_report().await;
        match outcome {
            Ok(()) => {
                self.reports_delivered += 1;
            }
            Err(WatchError::ReportBuild(reason)) => {
                error!(reason = %reason, "Snapshot unusable, skipping this cycle");
            }
            Err(WatchError::Enumeration(reason)) => {
                error!(reason = %reason, "Enumeration failed, skipping this cycle");
            }
            Err(WatchError::Transmission(reason)) => {
                warn!(reason = %reason, "Report dropped after retry exhaustion");
            }
            Err(e) => {
                error!(error = %e, "Report cycle failed");
            }
        }

        self.state = WatcherState::Armed;
    }

    async fn try_report(&mut self) -> Result<()> {
        let scan = run_enumeration(&self.scan_command, self.scan_timeout).await?;
        if !scan.success() {
            return Err(WatchError::Enumeration(format!(
                "enumeration tool exited with code {}",
                scan.exit_code
            )));
        }

        let report = build_report(&self.org_id, &self.machine_id, &scan.snapshot)?;
        self.transmitter.deliver(&report).await?;
        Ok(())
    }

    /// Subscribe to device events, retrying with backoff on failure.
    async fn subscribe_with_retry(&mut self) -> Result<mpsc::Receiver<DeviceEvent>> {
        let mut last_error = None;

        for attempt in 0..=self.resubscribe_attempts {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1, self.resubscribe_backoff);
                warn!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Resubscribing to device events"
                );
                tokio::time::sleep(delay).await;
            }

            match self.source.subscribe().await {
                Ok(rx) => {
                    self.state = WatcherState::Armed;
                    return Ok(rx);
                }
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "Device event subscription failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            WatchError::EventChannel("subscription failed with no attempts".to_string())
        }))
    }

    /// Collapse an event burst: wait out the debounce window, then drain
    /// everything that queued up meanwhile. Composite devices enumerate
    /// several sub-interfaces in quick succession; one report covers them.
    async fn debounce_burst(&self, rx: &mut mpsc::Receiver<DeviceEvent>) {
        tokio::time::sleep(self.debounce).await;
        while rx.try_recv().is_ok() {}
    }

    /// Run the watcher until the event channel is irrecoverably lost or the
    /// process lock is stolen.
    ///
    /// `guard` carries the process lock; its heartbeat is refreshed on
    /// `heartbeat_interval` for as long as the watcher runs.
    pub async fn run(
        &mut self,
        guard: Option<ProcessGuard>,
        heartbeat_interval: Duration,
    ) -> Result<()> {
        // The sender half stays alive here so `changed()` can only fire on
        // an actual heartbeat failure, never on channel teardown.
        let (lock_lost_tx, mut lock_lost_rx) = watch::channel(false);
        if let Some(guard) = guard {
            spawn_heartbeat(guard, heartbeat_interval, lock_lost_tx.clone());
        }

        let mut rx = self.subscribe_with_retry().await?;
        info!(machine_id = %self.machine_id, "Watcher armed");

        let mut resync = self.resync_interval.map(|period| {
            tokio::time::interval_at(tokio::time::Instant::now() + period, period)
        });

        loop {
            tokio::select! {
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) if event.is_usb() => {
                        self.debounce_burst(&mut rx).await;
                        self.report_once().await;
                    }
                    Some(_) => {
                        // Non-USB subsystems are not ours to report on.
                    }
                    None => {
                        warn!("Device event channel closed");
                        rx = self.subscribe_with_retry().await.map_err(|e| {
                            error!(error = %e, "Resubscription exhausted, escalating to restart");
                            e
                        })?;
                    }
                },
                _ = tick(&mut resync) => {
                    info!("Periodic resync");
                    self.report_once().await;
                }
                _ = lock_lost_rx.changed() => {
                    // Another instance reclaimed the lock; it owns this
                    // machine now and this process bows out.
                    error!("Process lock lost, stopping watcher");
                    return Err(WatchError::LockRejected { pid: 0 });
                }
            }
        }
    }
}

/// Await the next resync tick, or pend forever when resync is disabled.
async fn tick(resync: &mut Option<tokio::time::Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Refresh the lock heartbeat until refresh fails (lock stolen or fs gone).
fn spawn_heartbeat(
    guard: ProcessGuard,
    interval: Duration,
    lock_lost: watch::Sender<bool>,
) -> tokio::task::JoinHandle<()> {
    let guard = Arc::new(Mutex::new(guard));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            let mut guard = guard.lock().await;
            if let Err(e) = guard.refresh_heartbeat() {
                error!(error = %e, "Heartbeat refresh failed");
                let _ = lock_lost.send(true);
                return;
            }
        }
    })
}
