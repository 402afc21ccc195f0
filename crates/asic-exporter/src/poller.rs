//! Poll loop: discovery, assembly and reconciliation on a fixed interval

use asic_discovery::Discovery;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::assembler::Assembler;
use crate::metrics::{outcome, ExporterMetrics};
use crate::reconciler::Reconciler;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Discovery failed: {0:#}")]
    Discovery(anyhow::Error),
    #[error("Discovery found no devices")]
    NoDevices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Collecting,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollState::Idle => f.write_str("idle"),
            PollState::Collecting => f.write_str("collecting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub discovered: usize,
    pub reachable: usize,
    pub duration: Duration,
}

pub struct Poller {
    discovery: Arc<dyn Discovery>,
    assembler: Assembler,
    reconciler: Reconciler,
    metrics: ExporterMetrics,
    interval: Duration,
    state: Mutex<PollState>,
}

impl Poller {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        assembler: Assembler,
        reconciler: Reconciler,
        metrics: ExporterMetrics,
        interval: Duration,
    ) -> Self {
        Self {
            discovery,
            assembler,
            reconciler,
            metrics,
            interval,
            state: Mutex::new(PollState::Idle),
        }
    }

    pub fn state(&self) -> PollState {
        *self.state.lock()
    }

    fn transition(&self, next: PollState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        info!(from = %previous, to = %next, "Poll state changed");
    }

    /// Poll forever. Each cycle runs in its own task so a panic only costs
    /// that cycle. The interval starts once a cycle has finished.
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = self.interval.as_secs(), "Poll loop started");

        loop {
            self.transition(PollState::Collecting);

            let poller = self.clone();
            match tokio::spawn(async move { poller.run_cycle().await }).await {
                Ok(Ok(summary)) => {
                    self.metrics.count_cycle(outcome::OK);
                    info!(
                        discovered = summary.discovered,
                        reachable = summary.reachable,
                        duration_ms = summary.duration.as_millis() as u64,
                        "Poll cycle complete"
                    );
                }
                Ok(Err(e)) => {
                    self.metrics.count_cycle(outcome::SKIPPED);
                    warn!(error = %e, "Poll cycle skipped");
                }
                Err(e) => {
                    self.metrics.count_cycle(outcome::FAILED);
                    error!(error = %e, "Poll cycle aborted");
                }
            }

            self.transition(PollState::Idle);
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Run one discovery, assembly and reconciliation pass
    pub async fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        let started = Instant::now();

        let addresses = self
            .discovery
            .discover()
            .await
            .map_err(CycleError::Discovery)?;
        if addresses.is_empty() {
            return Err(CycleError::NoDevices);
        }

        let snapshots = self.assembler.assemble(&addresses).await;

        let reachable: HashSet<IpAddr> = snapshots
            .iter()
            .filter(|s| s.available)
            .map(|s| s.address)
            .collect();

        for snapshot in &snapshots {
            for category in snapshot.missing_categories() {
                self.metrics.count_fetch_failure(category);
            }
        }

        self.reconciler.reconcile(&snapshots, &reachable);

        let summary = CycleSummary {
            discovered: snapshots.len(),
            reachable: reachable.len(),
            duration: started.elapsed(),
        };
        self.metrics
            .observe_cycle(summary.discovered, summary.reachable, summary.duration);
        Ok(summary)
    }
}
