//! At-most-once finalization bookkeeping.

use crate::error::FlowError;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    in_flight: HashSet<Uuid>,
    /// Finalized flow ids, kept until the flow's own expiry.
    completed: HashMap<Uuid, DateTime<Utc>>,
}

/// Tracks which flows are being or have been finalized.
///
/// A flow id can be claimed once. A claim is either released (provisioning failed, the flow
/// may try again) or completed (the id is tombstoned until the flow would have expired).
#[derive(Default)]
pub struct FinalizationLedger {
    state: Mutex<LedgerState>,
}

impl FinalizationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a flow for finalization. Fails with `NotFound` if it is already claimed or
    /// finalized.
    pub async fn claim(&self, flow_id: Uuid) -> Result<(), FlowError> {
        let mut state = self.state.lock().await;
        if state.completed.contains_key(&flow_id) || !state.in_flight.insert(flow_id) {
            debug!(%flow_id, "Finalization claim rejected");
            return Err(FlowError::NotFound);
        }
        Ok(())
    }

    /// Give a claim back after a failed attempt.
    pub async fn release(&self, flow_id: Uuid) {
        self.state.lock().await.in_flight.remove(&flow_id);
    }

    /// Mark a claimed flow as finalized.
    pub async fn complete(&self, flow_id: Uuid, expires_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&flow_id);
        state.completed.insert(flow_id, expires_at);
    }

    pub async fn is_finalized(&self, flow_id: Uuid) -> bool {
        self.state.lock().await.completed.contains_key(&flow_id)
    }

    /// Drop tombstones whose flow has expired by `now`.
    pub async fn purge(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.completed.len();
        state.completed.retain(|_, expires_at| *expires_at > now);
        before - state.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_claim_once() {
        let ledger = FinalizationLedger::new();
        let id = Uuid::new_v4();

        ledger.claim(id).await.unwrap();
        assert!(matches!(ledger.claim(id).await, Err(FlowError::NotFound)));
    }

    #[tokio::test]
    async fn test_release_allows_retry() {
        let ledger = FinalizationLedger::new();
        let id = Uuid::new_v4();

        tokio_test::assert_ok!(ledger.claim(id).await);
        ledger.release(id).await;
        tokio_test::assert_ok!(ledger.claim(id).await);
    }

    #[tokio::test]
    async fn test_completed_is_permanent_until_purged() {
        let ledger = FinalizationLedger::new();
        let id = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::minutes(30);

        ledger.claim(id).await.unwrap();
        ledger.complete(id, expires_at).await;

        assert!(ledger.is_finalized(id).await);
        tokio_test::assert_err!(ledger.claim(id).await);

        assert_eq!(ledger.purge(Utc::now()).await, 0);
        assert_eq!(ledger.purge(expires_at).await, 1);
        assert!(!ledger.is_finalized(id).await);
    }
}
