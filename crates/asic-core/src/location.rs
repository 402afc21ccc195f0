//! Named network ranges and address-to-location resolution
//!
//! The ranges specification is a comma-separated list of `range` or
//! `name:range` entries, e.g. `"10.0.0.0/24,lab:10.0.1.0/24"`. Bare ranges
//! are named [`DEFAULT_LOCATION`]. IPv6 ranges may be bracketed
//! (`lab:[fd00::]/64`). Ranges may overlap; resolution always returns the
//! first match in configured order.

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Name assigned to ranges configured without an explicit name
pub const DEFAULT_LOCATION: &str = "default";

/// Label value used when an address is outside every configured range
pub const UNRESOLVED_LOCATION: &str = "unknown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("No network ranges configured")]
    Empty,
    #[error("Invalid network range '{entry}': {reason}")]
    InvalidRange { entry: String, reason: String },
    #[error("Empty location name in '{entry}'")]
    EmptyName { entry: String },
    #[error("Invalid location name '{name}': names may not contain '.', '/' or ':'")]
    InvalidName { name: String },
}

/// Characters a location name may not contain
const NAME_FORBIDDEN: [char; 3] = ['.', '/', ':'];

/// A named network range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRange {
    /// Location name used as the `location` label
    pub name: String,
    /// Network range (CIDR)
    pub network: IpNet,
}

impl LocationRange {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.network.contains(addr)
    }
}

impl fmt::Display for LocationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.network)
    }
}

/// Ordered table of named ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationTable {
    ranges: Vec<LocationRange>,
}

impl LocationTable {
    /// Parse a comma-separated `name:cidr` list
    pub fn parse(input: &str) -> Result<Self, LocationError> {
        let mut ranges = Vec::new();

        for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            ranges.push(parse_entry(entry)?);
        }

        if ranges.is_empty() {
            return Err(LocationError::Empty);
        }

        Ok(Self { ranges })
    }

    pub fn from_ranges(ranges: Vec<LocationRange>) -> Self {
        Self { ranges }
    }

    /// Name of the first range containing `addr`, or `None` when unresolved
    pub fn resolve(&self, addr: &IpAddr) -> Option<&str> {
        self.ranges
            .iter()
            .find(|r| r.contains(addr))
            .map(|r| r.name.as_str())
    }

    /// Like [`resolve`](Self::resolve) but substitutes [`UNRESOLVED_LOCATION`]
    pub fn resolve_label(&self, addr: &IpAddr) -> &str {
        self.resolve(addr).unwrap_or(UNRESOLVED_LOCATION)
    }

    pub fn ranges(&self) -> &[LocationRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl FromStr for LocationTable {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse one `range` or `name:range` entry
fn parse_entry(entry: &str) -> Result<LocationRange, LocationError> {
    // A bare IPv6 range contains ':' too, so try the whole entry first
    if let Ok(network) = parse_network(entry) {
        return Ok(LocationRange {
            name: DEFAULT_LOCATION.to_string(),
            network,
        });
    }

    let Some((name, range)) = entry.split_once(':') else {
        return Err(LocationError::InvalidRange {
            entry: entry.to_string(),
            reason: "not a CIDR range or address".to_string(),
        });
    };

    let name = name.trim();
    if name.is_empty() {
        return Err(LocationError::EmptyName {
            entry: entry.to_string(),
        });
    }
    if name.contains(NAME_FORBIDDEN) {
        return Err(LocationError::InvalidName {
            name: name.to_string(),
        });
    }

    let network = parse_network(range.trim()).map_err(|reason| LocationError::InvalidRange {
        entry: entry.to_string(),
        reason,
    })?;

    Ok(LocationRange {
        name: name.to_string(),
        network,
    })
}

/// Parse a CIDR range, or a single address as a host route
fn parse_network(text: &str) -> Result<IpNet, String> {
    let unbracketed;
    let text = match text.strip_prefix('[') {
        Some(rest) => {
            let (addr, prefix) = rest
                .split_once(']')
                .ok_or_else(|| "unterminated '['".to_string())?;
            unbracketed = format!("{}{}", addr, prefix);
            unbracketed.as_str()
        }
        None => text,
    };

    if text.contains('/') {
        return text
            .parse::<IpNet>()
            .map(|net| net.trunc())
            .map_err(|e| e.to_string());
    }

    text.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|e| e.to_string())
}
