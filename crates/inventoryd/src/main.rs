//! inventoryd daemon entry point

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use inventoryd::{router, AppState, FanoutHub, InventoryStore, InventorydConfig};

/// Central inventory collector for the usbfleet pipeline
#[derive(Debug, Parser)]
#[command(name = "inventoryd", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "/etc/usbfleet/inventoryd.conf")]
    config: String,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<String>,
}

/// Initialize tracing/logging.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run(cli: Cli) -> inventoryd::Result<()> {
    let mut config = InventorydConfig::load_or_default(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    config.validate()?;

    let addr = config.listen_addr()?;
    let store = Arc::new(InventoryStore::open(
        &config.store.data_dir,
        config.lock_wait(),
    )?);
    info!(
        data_dir = %config.store.data_dir.display(),
        orgs = store.org_ids().len(),
        "Inventory store opened"
    );

    let state = AppState {
        store,
        hub: Arc::new(FanoutHub::new(config.store.fanout_capacity)),
        keepalive: config.keepalive(),
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Collector listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    info!("--- Starting inventoryd ---");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {
            info!("inventoryd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("inventoryd error: {}", e);
            ExitCode::FAILURE
        }
    }
}
