//! usbwatchd daemon entry point
//!
//! Startup order matters: configuration, machine identity, then the
//! single-instance gate. A rejection at the gate is a clean exit, not an
//! operator-visible failure; everything after it runs until the event
//! channel is irrecoverably lost, at which point the supervising launcher
//! restarts the process.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use usbwatchd::{
    HttpTransmitter, MachineIdentity, ProcessGuard, UdevEventSource, WatchdConfig, Watcher,
};

/// Endpoint USB port watcher for the usbfleet pipeline
#[derive(Debug, Parser)]
#[command(name = "usbwatchd", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "/etc/usbfleet/usbwatchd.conf")]
    config: String,

    /// Report to the local development collector instead of the configured one
    #[arg(long)]
    local: bool,
}

/// Initialize tracing/logging.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run(cli: Cli) -> usbwatchd::Result<()> {
    let config = WatchdConfig::load_or_default(&cli.config)?;
    config.validate()?;

    let identity = MachineIdentity::new(config.machine_id_path());
    let machine_id = identity.resolve()?;
    info!(org_id = %config.org_id, machine_id = %machine_id, "Endpoint identity resolved");

    let guard = ProcessGuard::acquire(config.lock_path(), config.stale_threshold())?;

    let base_url = if cli.local {
        info!(url = %config.collector.local_url, "Using local development collector");
        config.collector.local_url.clone()
    } else {
        config.collector.server_url.clone()
    };

    let transmitter = HttpTransmitter::new(
        &base_url,
        config.request_timeout(),
        config.collector.max_attempts,
        std::time::Duration::from_millis(config.collector.retry_backoff_ms),
    )?;

    let mut watcher = Watcher::new(&config, machine_id, UdevEventSource::new(), transmitter);
    watcher
        .run(Some(guard), config.heartbeat_interval())
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    info!("--- Starting usbwatchd ---");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {
            info!("usbwatchd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_clean_rejection() => {
            // Another live instance owns this machine; nothing to do here.
            info!("{}", e);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("usbwatchd error: {}", e);
            ExitCode::FAILURE
        }
    }
}
