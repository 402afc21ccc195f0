//! Telemetry queries against the miner JSON API

use asic_core::Category;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::transport::TcpTransport;

/// Miner API port
pub const API_PORT: u16 = 4028;

/// Default timeout for queries
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Fields requested from `get_miner_info`
const MINER_INFO_FIELDS: &str = "ip,proto,netmask,gateway,dns,hostname,mac,ledstat,minersn";

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Could not connect to {0}: {1}")]
    Connect(SocketAddr, #[source] std::io::Error),
    #[error("Timed out talking to {0}")]
    Timeout(SocketAddr),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Command '{command}' rejected: {message}")]
    Rejected { command: String, message: String },
}

/// Source of raw per-category telemetry for a device
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self, address: IpAddr, category: Category) -> Result<Value, QueryError>;
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    cmd: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<&'a str>,
}

impl<'a> ApiRequest<'a> {
    fn for_category(category: Category) -> Self {
        Self {
            cmd: category.command(),
            info: (category == Category::Info).then_some(MINER_INFO_FIELDS),
        }
    }
}

/// Client for the miner JSON-over-TCP API
#[derive(Debug, Clone)]
pub struct MinerApiClient {
    port: u16,
    timeout: Duration,
}

impl Default for MinerApiClient {
    fn default() -> Self {
        Self::new(API_PORT, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

impl MinerApiClient {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run one API command and return the decoded, status-checked response
    pub async fn command(&self, address: IpAddr, category: Category) -> Result<Value, QueryError> {
        let target = SocketAddr::new(address, self.port);
        let request = serde_json::to_vec(&ApiRequest::for_category(category))
            .map_err(|e| QueryError::InvalidResponse(e.to_string()))?;

        let body = TcpTransport::new(target, self.timeout)
            .transceive(&request)
            .await?;

        let response: Value = serde_json::from_slice(&body)
            .map_err(|e| QueryError::InvalidResponse(format!("{}: {}", category.command(), e)))?;

        check_status(category.command(), &response)?;

        debug!(ip = %address, category = %category, "API command succeeded");
        Ok(response)
    }
}

#[async_trait]
impl TelemetrySource for MinerApiClient {
    async fn fetch(&self, address: IpAddr, category: Category) -> Result<Value, QueryError> {
        self.command(address, category).await
    }
}

/// Reject responses whose status is `E`.
///
/// Status comes either as a top-level string with a sibling `Msg`, or as a
/// `STATUS` array whose first entry carries `STATUS` and `Msg`.
fn check_status(command: &str, response: &Value) -> Result<(), QueryError> {
    let Some(status) = response.get("STATUS") else {
        return Ok(());
    };

    let (code, message) = match status {
        Value::String(code) => (code.as_str(), response.get("Msg")),
        Value::Array(entries) => match entries.first() {
            Some(entry) => (
                entry.get("STATUS").and_then(Value::as_str).unwrap_or(""),
                entry.get("Msg"),
            ),
            None => return Ok(()),
        },
        _ => return Ok(()),
    };

    if code != "E" {
        return Ok(());
    }

    let message = match message {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "no message".to_string(),
    };
    Err(QueryError::Rejected {
        command: command.to_string(),
        message,
    })
}
