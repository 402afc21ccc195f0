//! Async TCP transport for the miner JSON API

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::query::QueryError;

/// Upper bound on a single response body
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// One-shot TCP transport: every request opens a fresh connection, the
/// miner writes its response and closes.
pub struct TcpTransport {
    target: SocketAddr,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(target: SocketAddr, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// Send a request and read the response until the miner closes the
    /// connection. Connect, write and read each get the full timeout.
    pub async fn transceive(&self, request: &[u8]) -> Result<Vec<u8>, QueryError> {
        let mut stream = timeout(self.timeout, TcpStream::connect(self.target))
            .await
            .map_err(|_| QueryError::Timeout(self.target))?
            .map_err(|e| QueryError::Connect(self.target, e))?;

        trace!(target = %self.target, len = request.len(), "Sending API request");

        timeout(self.timeout, stream.write_all(request))
            .await
            .map_err(|_| QueryError::Timeout(self.target))??;

        let mut buf = Vec::with_capacity(4096);
        let mut limited = (&mut stream).take(MAX_RESPONSE_BYTES as u64 + 1);
        timeout(self.timeout, limited.read_to_end(&mut buf))
            .await
            .map_err(|_| QueryError::Timeout(self.target))??;

        if buf.len() > MAX_RESPONSE_BYTES {
            return Err(QueryError::InvalidResponse(format!(
                "response exceeds {} bytes",
                MAX_RESPONSE_BYTES
            )));
        }

        // Firmware terminates responses with NUL
        while buf.last() == Some(&0) {
            buf.pop();
        }

        trace!(target = %self.target, len = buf.len(), "Received API response");
        Ok(buf)
    }
}
