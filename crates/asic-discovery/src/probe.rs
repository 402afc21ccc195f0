//! API port probing for device verification

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Check whether a host accepts TCP connections on `port`
pub async fn probe_host(ip: IpAddr, port: u16, probe_timeout: Duration) -> bool {
    let target = SocketAddr::new(ip, port);
    match timeout(probe_timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            trace!(ip = %ip, error = %e, "Probe refused");
            false
        }
        Err(_) => {
            trace!(ip = %ip, "Probe timed out");
            false
        }
    }
}

/// Probe many hosts concurrently, at most `max_concurrent` connects in flight.
/// Returns the responsive hosts in no particular order.
pub async fn probe_hosts(
    hosts: &[IpAddr],
    port: u16,
    probe_timeout: Duration,
    max_concurrent: usize,
) -> Vec<IpAddr> {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for &host in hosts {
        let permits = permits.clone();
        tasks.spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok()?;
            probe_host(host, port, probe_timeout).await.then_some(host)
        });
    }

    let mut responsive = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Some(ip)) => {
                debug!(ip = %ip, "Found miner API");
                responsive.push(ip);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Probe task failed"),
        }
    }

    debug!(
        "Probed {} hosts, found {} responsive",
        hosts.len(),
        responsive.len()
    );
    responsive
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(probe_host(localhost, port, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!probe_host(localhost, port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_probe_hosts_with_single_permit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hosts: Vec<IpAddr> = vec!["127.0.0.1".parse().unwrap(); 4];

        let found = probe_hosts(&hosts, port, Duration::from_secs(1), 1).await;
        assert_eq!(found.len(), 4);
    }
}
