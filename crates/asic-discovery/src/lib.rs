//! ASIC Discovery - Finding miners on the configured networks
//!
//! Every configured range is swept with TCP connects to the miner API port.
//! Hosts that accept the connection are polled for telemetry.

pub mod probe;
pub mod scanner;

pub use scanner::{Discovery, NetworkScanner, ScanError, ScannerConfig, MAX_HOSTS_PER_RANGE};
