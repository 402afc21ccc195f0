//! ASIC Exporter - Main entry point
//!
//! Discovers miners on the configured ranges, polls their telemetry on a
//! fixed interval and serves it in the Prometheus text format.

mod api;
mod assembler;
mod config;
mod metrics;
mod poller;
mod reconciler;
mod registry;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = config::Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level)?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("ASIC Exporter v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;
    config.apply_args(&args);

    // Create application state
    let state = state::AppState::new(config)?;

    info!(
        locations = state.locations.len(),
        interval_secs = state.config.exporter.refresh_interval,
        api_port = state.config.discovery.api_port,
        "Configuration loaded"
    );

    server::run(state.clone(), state.config.bind_addr()).await
}
