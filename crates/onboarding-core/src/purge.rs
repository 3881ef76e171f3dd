//! Periodic removal of expired flows and finalization tombstones.
//!
//! Expiry is enforced lazily on every operation; purging only reclaims storage.

use crate::provisioning::FinalizationLedger;
use crate::store::FlowRepository;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Counts from one purge cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub flows: usize,
    pub tombstones: usize,
}

pub struct FlowPurger {
    repository: FlowRepository,
    ledger: Arc<FinalizationLedger>,
    interval: Duration,
}

impl FlowPurger {
    pub fn new(
        repository: FlowRepository,
        ledger: Arc<FinalizationLedger>,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            ledger,
            interval,
        }
    }

    /// Run a single purge cycle.
    pub async fn purge_once(&self) -> PurgeReport {
        let now = Utc::now();

        let flows = match self.repository.purge_expired(now).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Failed to purge expired flows: {}", e);
                0
            }
        };
        let tombstones = self.ledger.purge(now).await;

        PurgeReport { flows, tombstones }
    }

    /// Purge forever, sleeping `interval` between cycles.
    pub async fn run(&self) {
        info!("Starting flow purger, interval: {:?}", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;

            let report = self.purge_once().await;
            if report == PurgeReport::default() {
                debug!("Nothing to purge this cycle");
            } else {
                info!(
                    flows = report.flows,
                    tombstones = report.tombstones,
                    "Purged expired registration state"
                );
            }
        }
    }
}

/// Spawn the purger as a background task.
pub fn spawn_purger(
    repository: FlowRepository,
    ledger: Arc<FinalizationLedger>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let purger = FlowPurger::new(repository, ledger, interval);

    tokio::spawn(async move {
        purger.run().await;
    })
}
