//! ASIC API - Miner telemetry client
//!
//! This crate speaks the miner JSON-over-TCP API and exposes it behind the
//! [`TelemetrySource`] trait the exporter fetches through.

pub mod query;
pub mod transport;

pub use query::{MinerApiClient, QueryError, TelemetrySource, API_PORT, DEFAULT_TIMEOUT_MS};
pub use transport::TcpTransport;
