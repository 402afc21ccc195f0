//! ASIC Core - Shared types for the ASIC miner exporter
//!
//! This crate provides the pieces every other crate builds on:
//! - Location ranges and IP to location resolution
//! - Typed telemetry responses for each API category
//! - Per-device snapshots assembled each poll cycle
//! - The metric schema that turns snapshots into labeled series

pub mod board;
pub mod location;
pub mod metric;
pub mod schema;
pub mod snapshot;
pub mod telemetry;

pub use board::{composite_status, upgrade_complete, BoardPosition};
pub use location::{LocationError, LocationRange, LocationTable, DEFAULT_LOCATION, UNRESOLVED_LOCATION};
pub use metric::normalize_metric_name;
pub use schema::{metric_schema, ExtractError, Extractor, MetricSpec, Retention, Row, BASE_LABELS};
pub use snapshot::{Categories, DeviceSnapshot};
pub use telemetry::Category;
