//! Session-addressed flow storage for the web surface.

use async_trait::async_trait;
use onboarding_core::flow::{FlowUpdate, RegistrationFlow};
use onboarding_core::{FlowError, FlowStore};
use tower_sessions::Session;
use tracing::debug;

/// Session key the in-progress flow is kept under.
pub const FLOW_KEY: &str = "registration_flow";

/// The flow held in one caller's session.
///
/// Each request works on its own copy of the session record, saved when the
/// response completes. Concurrent steps on one session are last-write-wins;
/// finalization is guarded by the provisioning ledger, not here.
pub struct SessionFlowStore {
    session: Session,
}

impl SessionFlowStore {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Put a fresh flow in the session, replacing any earlier one.
    pub async fn begin(&self, flow: &RegistrationFlow) -> Result<(), FlowError> {
        self.session
            .insert(FLOW_KEY, flow)
            .await
            .map_err(session_error)
    }
}

fn session_error(e: tower_sessions::session::Error) -> FlowError {
    FlowError::Storage(format!("Session error: {}", e))
}

#[async_trait]
impl FlowStore for SessionFlowStore {
    async fn load(&self) -> Result<Option<RegistrationFlow>, FlowError> {
        self.session
            .get::<RegistrationFlow>(FLOW_KEY)
            .await
            .map_err(session_error)
    }

    async fn write(&self, update: FlowUpdate) -> Result<RegistrationFlow, FlowError> {
        let mut flow = self
            .session
            .get::<RegistrationFlow>(FLOW_KEY)
            .await
            .map_err(session_error)?
            .ok_or(FlowError::NotFound)?;
        flow.apply_update(update);
        self.session
            .insert(FLOW_KEY, &flow)
            .await
            .map_err(session_error)?;

        debug!(flow_id = %flow.id, current_step = %flow.current_step, "Session flow updated");
        Ok(flow)
    }

    async fn destroy(&self) -> Result<Option<RegistrationFlow>, FlowError> {
        self.session
            .remove::<RegistrationFlow>(FLOW_KEY)
            .await
            .map_err(session_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use onboarding_core::flow::{PhonePatch, StepPayload};
    use onboarding_core::{RegistrationKind, Step};
    use std::sync::Arc;
    use tower_sessions::MemoryStore;

    fn session(store: &Arc<MemoryStore>) -> Session {
        Session::new(None, store.clone(), None)
    }

    fn flow() -> RegistrationFlow {
        RegistrationFlow::new(RegistrationKind::Student, None, Duration::minutes(30))
    }

    #[tokio::test]
    async fn test_sessions_hold_independent_flows() {
        let backing = Arc::new(MemoryStore::default());
        let first = SessionFlowStore::new(session(&backing));
        let second = SessionFlowStore::new(session(&backing));

        first.begin(&flow()).await.unwrap();
        let updated = first
            .write(
                FlowUpdate::new(StepPayload::Phone(PhonePatch::issued("+14155551234", "0042")))
                    .advancing_to(Step::VerifyPhone),
            )
            .await
            .unwrap();

        assert_eq!(updated.current_step, Step::VerifyPhone);
        assert_eq!(first.current_step().await.unwrap(), Step::VerifyPhone);
        assert!(second.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_without_flow_is_not_found() {
        let store = SessionFlowStore::new(session(&Arc::new(MemoryStore::default())));

        let update = FlowUpdate::new(StepPayload::Phone(PhonePatch::issued("+14155551234", "0000")));
        assert!(matches!(store.write(update).await, Err(FlowError::NotFound)));
    }

    #[tokio::test]
    async fn test_destroy_is_claim_once() {
        let store = SessionFlowStore::new(session(&Arc::new(MemoryStore::default())));
        store.begin(&flow()).await.unwrap();

        assert!(store.destroy().await.unwrap().is_some());
        assert!(store.destroy().await.unwrap().is_none());
    }
}
