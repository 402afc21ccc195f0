//! Configuration loading and validation
//!
//! Settings come from built-in defaults, then an optional TOML file, then
//! environment variables and command-line flags, highest last.

use anyhow::Result;
use asic_core::{LocationError, LocationTable};
use asic_discovery::ScannerConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No network ranges configured; set ASIC_IP_RANGE or --ip-range")]
    MissingIpRange,
    #[error("Invalid network ranges: {0}")]
    InvalidRanges(#[from] LocationError),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Parser, Debug)]
#[command(name = "asic-exporter")]
#[command(about = "Prometheus exporter for ASIC miner telemetry")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "asic-exporter.toml")]
    pub config: PathBuf,

    /// Address the metrics server listens on
    #[arg(long, env = "ASIC_EXPORTER_ADDRESS")]
    pub address: Option<IpAddr>,

    /// Port the metrics server listens on
    #[arg(short, long, env = "ASIC_EXPORTER_PORT")]
    pub port: Option<u16>,

    /// Seconds between the end of one poll cycle and the start of the next
    #[arg(long, env = "ASIC_REFRESH_INTERVAL")]
    pub refresh_interval: Option<u64>,

    /// Comma-separated ranges, each `range` or `name:range`
    #[arg(long, env = "ASIC_IP_RANGE")]
    pub ip_range: Option<String>,

    /// Miner API port
    #[arg(long, env = "ASIC_API_PORT")]
    pub api_port: Option<u16>,

    /// Per-request telemetry timeout in milliseconds
    #[arg(long, env = "ASIC_FETCH_TIMEOUT_MS")]
    pub fetch_timeout_ms: Option<u64>,

    /// Discovery connect timeout in milliseconds
    #[arg(long, env = "ASIC_PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: Option<u64>,

    /// Maximum discovery probes in flight
    #[arg(long, env = "ASIC_MAX_CONCURRENT_PROBES")]
    pub max_concurrent_probes: Option<usize>,

    /// Log filter (trace, debug, info, warn, error or a directive list)
    #[arg(short, long, env = "ASIC_LOG", default_value = "info")]
    pub log_level: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exporter: ExporterConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Bind address for the metrics server
    #[serde(default = "default_address")]
    pub address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Poll interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            refresh_interval: default_refresh_interval(),
        }
    }
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    9904
}

fn default_refresh_interval() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Network ranges, required
    #[serde(default)]
    pub ip_range: Option<String>,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ip_range: None,
            api_port: default_api_port(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

fn default_api_port() -> u16 {
    asic_api::API_PORT
}

fn default_fetch_timeout_ms() -> u64 {
    asic_api::DEFAULT_TIMEOUT_MS
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_max_concurrent_probes() -> usize {
    256
}

impl Config {
    /// Apply environment and command-line values on top of this config
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(address) = args.address {
            self.exporter.address = address;
        }
        if let Some(port) = args.port {
            self.exporter.port = port;
        }
        if let Some(interval) = args.refresh_interval {
            self.exporter.refresh_interval = interval;
        }
        if let Some(ranges) = &args.ip_range {
            self.discovery.ip_range = Some(ranges.clone());
        }
        if let Some(port) = args.api_port {
            self.discovery.api_port = port;
        }
        if let Some(ms) = args.fetch_timeout_ms {
            self.discovery.fetch_timeout_ms = ms;
        }
        if let Some(ms) = args.probe_timeout_ms {
            self.discovery.probe_timeout_ms = ms;
        }
        if let Some(n) = args.max_concurrent_probes {
            self.discovery.max_concurrent_probes = n;
        }
    }

    /// Check every value and parse the location table
    pub fn validate(&self) -> Result<LocationTable, ConfigError> {
        let ranges = self
            .discovery
            .ip_range
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or(ConfigError::MissingIpRange)?;

        require_nonzero("refresh_interval", self.exporter.refresh_interval)?;
        require_nonzero("fetch_timeout_ms", self.discovery.fetch_timeout_ms)?;
        require_nonzero("probe_timeout_ms", self.discovery.probe_timeout_ms)?;
        require_nonzero(
            "max_concurrent_probes",
            self.discovery.max_concurrent_probes as u64,
        )?;
        require_nonzero("port", u64::from(self.exporter.port))?;
        require_nonzero("api_port", u64::from(self.discovery.api_port))?;

        Ok(LocationTable::parse(ranges)?)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.exporter.address, self.exporter.port)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.exporter.refresh_interval)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery.fetch_timeout_ms)
    }

    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self, locations: &LocationTable) -> ScannerConfig {
        ScannerConfig {
            ranges: locations.ranges().iter().map(|r| r.network).collect(),
            port: self.discovery.api_port,
            probe_timeout: Duration::from_millis(self.discovery.probe_timeout_ms),
            max_concurrent_probes: self.discovery.max_concurrent_probes,
        }
    }
}

fn require_nonzero(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["asic-exporter"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:9904");
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.discovery.api_port, 4028);
        assert_eq!(config.fetch_timeout(), Duration::from_millis(5000));
        assert_eq!(config.discovery.probe_timeout_ms, 1000);
        assert_eq!(config.discovery.max_concurrent_probes, 256);
    }

    #[test]
    fn test_missing_ip_range_is_fatal() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::MissingIpRange)
        ));

        let mut config = Config::default();
        config.discovery.ip_range = Some("   ".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::MissingIpRange)));
    }

    #[test]
    fn test_malformed_ranges_are_fatal() {
        let mut config = Config::default();
        config.discovery.ip_range = Some("lab:10.0.1.0/33".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRanges(_))));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let mut config = Config::default();
        config.discovery.ip_range = Some("10.0.0.0/24".to_string());
        config.exporter.refresh_interval = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                name: "refresh_interval",
                ..
            })
        ));

        config.exporter.refresh_interval = 60;
        config.discovery.fetch_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                name: "fetch_timeout_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_valid_config_yields_location_table() {
        let mut config = Config::default();
        config.discovery.ip_range = Some("10.0.0.0/24, lab:10.0.1.0/24".to_string());
        let table = config.validate().unwrap();
        assert_eq!(table.len(), 2);

        let scanner = config.to_scanner_config(&table);
        assert_eq!(scanner.ranges.len(), 2);
        assert_eq!(scanner.port, 4028);
    }

    #[test]
    fn test_file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[exporter]
port = 9100
refresh_interval = 30

[discovery]
ip_range = "rack1:192.168.10.0/24"
fetch_timeout_ms = 2000
"#
        )
        .unwrap();

        let mut config = load_config(file.path()).unwrap();
        assert_eq!(config.exporter.port, 9100);
        assert_eq!(config.exporter.refresh_interval, 30);
        assert_eq!(config.exporter.address, default_address());
        assert_eq!(config.discovery.fetch_timeout_ms, 2000);
        assert_eq!(config.discovery.api_port, 4028);

        config.apply_args(&args(&["--port", "9200", "--ip-range", "lab:10.0.1.0/24"]));
        assert_eq!(config.exporter.port, 9200);
        assert_eq!(config.exporter.refresh_interval, 30);
        assert_eq!(config.discovery.ip_range.as_deref(), Some("lab:10.0.1.0/24"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[exporter]\nport = \"not a number\"").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
