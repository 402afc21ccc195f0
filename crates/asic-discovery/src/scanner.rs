//! Range scanner that finds miners answering on the API port

use anyhow::Result;
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::probe::probe_hosts;

/// Largest range accepted, counted in addresses
pub const MAX_HOSTS_PER_RANGE: u128 = 65_536;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("Range {range} has {addresses} addresses, limit is {limit}")]
    RangeTooLarge {
        range: IpNet,
        addresses: u128,
        limit: u128,
    },
}

/// Produces the set of addresses to poll this cycle
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<IpAddr>>;
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Ranges to scan, in configured order
    pub ranges: Vec<IpNet>,
    /// Port probed on every host
    pub port: u16,
    /// Per-host connect timeout
    pub probe_timeout: Duration,
    /// Upper bound on connects in flight
    pub max_concurrent_probes: usize,
}

/// Probes every host of every configured range each time it is asked
pub struct NetworkScanner {
    config: ScannerConfig,
    /// Deduplicated, sorted candidates
    candidates: Vec<IpAddr>,
}

impl NetworkScanner {
    /// Create a scanner, rejecting ranges too large to sweep every cycle
    pub fn new(config: ScannerConfig) -> Result<Self, ScanError> {
        let mut candidates = BTreeSet::new();
        for range in &config.ranges {
            let addresses = address_count(range);
            if addresses > MAX_HOSTS_PER_RANGE {
                return Err(ScanError::RangeTooLarge {
                    range: *range,
                    addresses,
                    limit: MAX_HOSTS_PER_RANGE,
                });
            }
            candidates.extend(range.hosts());
        }

        debug!(
            ranges = config.ranges.len(),
            candidates = candidates.len(),
            "Scanner initialized"
        );

        Ok(Self {
            config,
            candidates: candidates.into_iter().collect(),
        })
    }

    /// Every address probed per scan, sorted
    pub fn candidates(&self) -> &[IpAddr] {
        &self.candidates
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Run a single scan and return the responsive addresses, sorted
    pub async fn scan_once(&self) -> Vec<IpAddr> {
        info!(
            candidates = self.candidates.len(),
            port = self.config.port,
            "Starting discovery scan"
        );

        let mut found = probe_hosts(
            &self.candidates,
            self.config.port,
            self.config.probe_timeout,
            self.config.max_concurrent_probes,
        )
        .await;
        found.sort();

        info!(found = found.len(), "Discovery scan complete");
        found
    }
}

#[async_trait]
impl Discovery for NetworkScanner {
    async fn discover(&self) -> Result<Vec<IpAddr>> {
        Ok(self.scan_once().await)
    }
}

/// Total addresses covered by a range, network and broadcast included
fn address_count(range: &IpNet) -> u128 {
    let host_bits = u32::from(range.max_prefix_len() - range.prefix_len());
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}
