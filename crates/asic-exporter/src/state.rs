//! Application state management

use anyhow::Result;
use asic_api::MinerApiClient;
use asic_core::LocationTable;
use asic_discovery::NetworkScanner;
use std::sync::Arc;
use tracing::info;

use crate::assembler::Assembler;
use crate::config::Config;
use crate::metrics::ExporterMetrics;
use crate::poller::Poller;
use crate::reconciler::Reconciler;
use crate::registry::MetricRegistry;

/// Shared application state
pub struct AppState {
    /// Metric registry served on `/metrics`
    pub registry: Arc<MetricRegistry>,
    /// Poll loop driving discovery and reconciliation
    pub poller: Arc<Poller>,
    /// Configured location ranges
    pub locations: Arc<LocationTable>,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Validate the configuration and wire up every component
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let locations = Arc::new(config.validate()?);
        for range in locations.ranges() {
            info!(location = %range.name, range = %range.network, "Location range");
        }

        let scanner = NetworkScanner::new(config.to_scanner_config(&locations))?;
        let client = MinerApiClient::new(config.discovery.api_port, config.fetch_timeout());

        let registry = Arc::new(MetricRegistry::new());
        let metrics = ExporterMetrics::register(&registry)?;

        let assembler = Assembler::new(Arc::new(client), locations.clone(), config.fetch_timeout());
        let reconciler = Reconciler::new(registry.clone());
        let poller = Arc::new(Poller::new(
            Arc::new(scanner),
            assembler,
            reconciler,
            metrics,
            config.refresh_interval(),
        ));

        Ok(Arc::new(Self {
            registry,
            poller,
            locations,
            config,
        }))
    }
}
