//! The exporter's own metrics

use asic_core::Category;
use prometheus::{Gauge, IntCounterVec, IntGauge, Opts};
use std::time::Duration;

use crate::registry::{MetricRegistry, RegistryError};

/// Outcome label values for `asic_exporter_cycles_total`
pub mod outcome {
    pub const OK: &str = "ok";
    pub const SKIPPED: &str = "skipped";
    pub const FAILED: &str = "failed";
}

#[derive(Clone)]
pub struct ExporterMetrics {
    pub cycle_duration: Gauge,
    pub devices_discovered: IntGauge,
    pub devices_reachable: IntGauge,
    pub fetch_failures: IntCounterVec,
    pub cycles: IntCounterVec,
}

impl ExporterMetrics {
    /// Create the self-metrics and register them with `registry`
    pub fn register(registry: &MetricRegistry) -> Result<Self, RegistryError> {
        let cycle_duration = Gauge::new(
            "asic_exporter_cycle_duration_seconds",
            "Wall time of the last completed poll cycle",
        )?;
        let devices_discovered = IntGauge::new(
            "asic_exporter_devices_discovered",
            "Devices found by discovery in the last cycle",
        )?;
        let devices_reachable = IntGauge::new(
            "asic_exporter_devices_reachable",
            "Devices that returned telemetry in the last cycle",
        )?;
        let fetch_failures = IntCounterVec::new(
            Opts::new(
                "asic_exporter_fetch_failures_total",
                "Category fetches that failed, timed out or did not decode",
            ),
            &["category"],
        )?;
        let cycles = IntCounterVec::new(
            Opts::new("asic_exporter_cycles_total", "Poll cycles by outcome"),
            &["outcome"],
        )?;

        registry.register_collector(Box::new(cycle_duration.clone()))?;
        registry.register_collector(Box::new(devices_discovered.clone()))?;
        registry.register_collector(Box::new(devices_reachable.clone()))?;
        registry.register_collector(Box::new(fetch_failures.clone()))?;
        registry.register_collector(Box::new(cycles.clone()))?;

        // Expose every label up front so the counters start at 0
        for category in Category::ALL {
            fetch_failures.with_label_values(&[category.as_str()]);
        }
        for label in [outcome::OK, outcome::SKIPPED, outcome::FAILED] {
            cycles.with_label_values(&[label]);
        }

        Ok(Self {
            cycle_duration,
            devices_discovered,
            devices_reachable,
            fetch_failures,
            cycles,
        })
    }

    pub fn observe_cycle(&self, discovered: usize, reachable: usize, duration: Duration) {
        self.devices_discovered.set(discovered as i64);
        self.devices_reachable.set(reachable as i64);
        self.cycle_duration.set(duration.as_secs_f64());
    }

    pub fn count_fetch_failure(&self, category: Category) {
        self.fetch_failures.with_label_values(&[category.as_str()]).inc();
    }

    pub fn count_cycle(&self, outcome: &str) {
        self.cycles.with_label_values(&[outcome]).inc();
    }
}
