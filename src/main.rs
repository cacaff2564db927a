//! Team Monitor - Main Entry Point
//!
//! Loads the configuration, starts the monitor and stops it cleanly on
//! Ctrl+C.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use team_monitor::config::CONFIG_PATH_ENV;
use team_monitor::utils::{init_telemetry, init_telemetry_json};
use team_monitor::{MonitorConfig, TeamMonitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file found or error loading it: {}", e);
    }

    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => init_telemetry_json(),
        _ => init_telemetry(),
    }

    info!("Team Monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = MonitorConfig::from_env().with_context(|| {
        format!(
            "failed to load configuration (set {} to override the path)",
            CONFIG_PATH_ENV
        )
    })?;

    info!(
        "Monitoring {} channel(s): {}",
        config.supervisor.channel_ids.len(),
        config.supervisor.channel_ids.join(", ")
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    info!("Press Ctrl+C to stop.");

    if let Err(e) = TeamMonitor::new(config).run(cancel).await {
        error!("Monitor stopped with an error: {}", e);
        return Err(e.into());
    }

    info!("Shut down cleanly.");
    Ok(())
}

/// Cancels `cancel` on Ctrl+C.
async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
    cancel.cancel();
}
