//! Step ordering and per-step validation over a [`FlowStore`].

use crate::challenge::ChallengeService;
use crate::error::{FieldErrors, FlowError};
use crate::flow::{
    validate_pin, validate_profile, FlowUpdate, PhonePatch, PinData, ProfileSubmission,
    RegistrationFlow, StepPayload,
};
use crate::provisioning::{ProvisionedAccount, ProvisioningService};
use crate::store::FlowStore;
use crate::types::{JoinToken, RegistrationKind, Step};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument};

/// Read-only view of where a flow stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowStatus {
    pub kind: RegistrationKind,
    pub current_step: Step,
    pub accessible_steps: Vec<Step>,
    pub expires_at: DateTime<Utc>,
}

impl From<&RegistrationFlow> for FlowStatus {
    fn from(flow: &RegistrationFlow) -> Self {
        Self {
            kind: flow.kind,
            current_step: flow.current_step,
            accessible_steps: flow.accessible_steps(),
            expires_at: flow.expires_at,
        }
    }
}

/// A submission for one step.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepSubmission {
    Profile(ProfileSubmission),
    VerifyPhone { code: String },
    SetPin { pin: String },
    ConfirmPin { pin: String },
}

impl StepSubmission {
    pub fn step(&self) -> Step {
        match self {
            StepSubmission::Profile(_) => Step::Profile,
            StepSubmission::VerifyPhone { .. } => Step::VerifyPhone,
            StepSubmission::SetPin { .. } => Step::SetPin,
            StepSubmission::ConfirmPin { .. } => Step::ConfirmPin,
        }
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Advanced(FlowStatus),
    Finished(ProvisionedAccount),
}

/// Drives flows through `profile → verify_phone → set_pin → confirm_pin → finished`.
///
/// Every operation first rejects a missing, finalized or expired flow, then checks that the
/// step is accessible, then validates. Rejections leave the flow untouched.
#[derive(Clone)]
pub struct FlowStateMachine {
    challenges: ChallengeService,
    provisioning: Arc<ProvisioningService>,
    ttl: Duration,
}

impl FlowStateMachine {
    pub fn new(
        challenges: ChallengeService,
        provisioning: Arc<ProvisioningService>,
        ttl: Duration,
    ) -> Self {
        Self {
            challenges,
            provisioning,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn provisioning(&self) -> &Arc<ProvisioningService> {
        &self.provisioning
    }

    /// A fresh flow at the profile step. The caller decides where it is stored.
    pub fn start(&self, kind: RegistrationKind, join_token: Option<JoinToken>) -> RegistrationFlow {
        let flow = RegistrationFlow::new(kind, join_token, self.ttl);
        info!(flow_id = %flow.id, ?kind, "Registration flow started");
        flow
    }

    pub async fn status(&self, store: &dyn FlowStore) -> Result<FlowStatus, FlowError> {
        let flow = self.load_active(store).await?;
        Ok(FlowStatus::from(&flow))
    }

    /// Dispatch a submission to its step operation.
    pub async fn submit(
        &self,
        store: &dyn FlowStore,
        submission: StepSubmission,
    ) -> Result<SubmitOutcome, FlowError> {
        match submission {
            StepSubmission::Profile(profile) => self
                .submit_profile(store, profile)
                .await
                .map(SubmitOutcome::Advanced),
            StepSubmission::VerifyPhone { code } => self
                .submit_phone_code(store, &code)
                .await
                .map(SubmitOutcome::Advanced),
            StepSubmission::SetPin { pin } => {
                self.submit_pin(store, &pin).await.map(SubmitOutcome::Advanced)
            }
            StepSubmission::ConfirmPin { pin } => self
                .submit_pin_confirmation(store, &pin)
                .await
                .map(SubmitOutcome::Finished),
        }
    }

    /// Store the profile, issue a challenge for its phone and move to `verify_phone`.
    #[instrument(skip_all)]
    pub async fn submit_profile(
        &self,
        store: &dyn FlowStore,
        submission: ProfileSubmission,
    ) -> Result<FlowStatus, FlowError> {
        self.load_accessible(store, Step::Profile).await?;

        let profile = validate_profile(&submission).map_err(FlowError::ValidationFailed)?;
        let join_token = JoinToken::from_fields(
            submission.class_token.as_deref(),
            submission.school_token.as_deref(),
        );
        let phone_number = profile.phone_number.clone();

        let flow = store
            .write(
                FlowUpdate::new(StepPayload::Profile(profile))
                    .advancing_to(Step::VerifyPhone)
                    .with_join_token(join_token),
            )
            .await?;
        self.challenges.issue(store, &phone_number).await?;

        info!(flow_id = %flow.id, "Profile accepted");
        Ok(FlowStatus::from(&flow))
    }

    /// Check the verification code. A match marks the phone verified and moves to `set_pin`.
    #[instrument(skip_all)]
    pub async fn submit_phone_code(
        &self,
        store: &dyn FlowStore,
        code: &str,
    ) -> Result<FlowStatus, FlowError> {
        let flow = self.load_accessible(store, Step::VerifyPhone).await?;

        let code = code.trim();
        if code.is_empty() {
            return Err(FlowError::ValidationFailed(FieldErrors::single(
                "code",
                "can't be blank",
            )));
        }

        let phone = flow
            .phone
            .as_ref()
            .filter(|phone| phone.code.is_some())
            .ok_or(FlowError::ChallengeMismatch)?;
        let matches = phone
            .code
            .as_deref()
            .is_some_and(|stored| ChallengeService::verify(code, stored));
        if !matches {
            debug!(flow_id = %flow.id, "Verification code mismatch");
            return Err(FlowError::ChallengeMismatch);
        }

        let flow = store
            .write(
                FlowUpdate::new(StepPayload::Phone(PhonePatch::verified(phone.number.clone())))
                    .advancing_to(Step::SetPin),
            )
            .await?;

        info!(flow_id = %flow.id, "Phone verified");
        Ok(FlowStatus::from(&flow))
    }

    /// Store the temporary PIN and move to `confirm_pin`. The latest PIN wins.
    #[instrument(skip_all)]
    pub async fn submit_pin(&self, store: &dyn FlowStore, pin: &str) -> Result<FlowStatus, FlowError> {
        self.load_accessible(store, Step::SetPin).await?;

        validate_pin(pin).map_err(FlowError::ValidationFailed)?;

        let flow = store
            .write(FlowUpdate::new(StepPayload::Pin(PinData::new(pin))).advancing_to(Step::ConfirmPin))
            .await?;

        info!(flow_id = %flow.id, "PIN set");
        Ok(FlowStatus::from(&flow))
    }

    /// Compare the confirmation with the temporary PIN and finalize on a match.
    #[instrument(skip_all)]
    pub async fn submit_pin_confirmation(
        &self,
        store: &dyn FlowStore,
        pin: &str,
    ) -> Result<ProvisionedAccount, FlowError> {
        let flow = self.load_accessible(store, Step::ConfirmPin).await?;

        if pin.is_empty() {
            return Err(FlowError::ValidationFailed(FieldErrors::single(
                "pin",
                "can't be blank",
            )));
        }

        let matches = flow
            .temporary_pin()
            .is_some_and(|stored| {
                stored.len() == pin.len() && stored.as_bytes().ct_eq(pin.as_bytes()).into()
            });
        if !matches {
            debug!(flow_id = %flow.id, "PIN confirmation mismatch");
            return Err(FlowError::PinMismatch);
        }

        self.provisioning.finalize(store, &flow).await
    }

    /// Issue a new code for the profile phone without moving the flow.
    #[instrument(skip_all)]
    pub async fn resend_code(&self, store: &dyn FlowStore) -> Result<FlowStatus, FlowError> {
        let flow = self.load_accessible(store, Step::VerifyPhone).await?;

        let phone_number = flow
            .profile
            .as_ref()
            .map(|profile| profile.phone_number.clone())
            .ok_or(FlowError::StepNotAccessible(Step::VerifyPhone))?;
        self.challenges.issue(store, &phone_number).await?;

        info!(flow_id = %flow.id, "Verification code resent");
        Ok(FlowStatus::from(&flow))
    }

    /// Load a flow that exists, is not finalized and has not expired.
    async fn load_active(&self, store: &dyn FlowStore) -> Result<RegistrationFlow, FlowError> {
        let flow = store.load().await?.ok_or(FlowError::NotFound)?;

        if self.provisioning.is_finalized(flow.id).await {
            return Err(FlowError::NotFound);
        }
        if flow.is_expired() {
            debug!(flow_id = %flow.id, "Flow expired");
            return Err(FlowError::Expired);
        }
        Ok(flow)
    }

    async fn load_accessible(
        &self,
        store: &dyn FlowStore,
        step: Step,
    ) -> Result<RegistrationFlow, FlowError> {
        let flow = self.load_active(store).await?;
        if !flow.can_access(step) {
            debug!(flow_id = %flow.id, %step, current_step = %flow.current_step, "Step not accessible");
            return Err(FlowError::StepNotAccessible(step));
        }
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccountStore;
    use crate::credential::JwtIssuer;
    use crate::delivery::Outbox;
    use crate::flow::StepData;
    use crate::invites::StaticInviteResolver;
    use crate::notify::{MessageConfirmation, TracingNotifications};
    use crate::store::{FlowRepository, PersistedFlowStore};
    use crate::types::StepKey;
    use secrecy::SecretString;

    const PHONE: &str = "+14155551234";

    fn machine(outbox: &Outbox) -> FlowStateMachine {
        let provisioning = ProvisioningService::new(
            Arc::new(MemoryAccountStore::new()),
            Arc::new(StaticInviteResolver::new()),
            Arc::new(TracingNotifications),
            Arc::new(MessageConfirmation::new(Arc::new(outbox.clone()))),
            Arc::new(JwtIssuer::new(
                &SecretString::new("secret".to_string()),
                "onboarding",
                Duration::hours(1),
            )),
        );
        FlowStateMachine::new(
            ChallengeService::new(Arc::new(outbox.clone())),
            Arc::new(provisioning),
            Duration::minutes(30),
        )
    }

    async fn started(machine: &FlowStateMachine) -> PersistedFlowStore {
        let repository = FlowRepository::memory();
        let flow = machine.start(RegistrationKind::Student, None);
        repository.bind(repository.create(flow).await.unwrap())
    }

    fn profile() -> ProfileSubmission {
        ProfileSubmission {
            first_name: Some("John".into()),
            last_name: Some("Doe".into()),
            email: Some("John@Example.com".into()),
            birthdate: Some("2008-04-12".into()),
            phone_number: Some("+1 (415) 555-1234".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_profile_issues_code_and_advances() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let store = started(&machine).await;

        let status = machine.submit_profile(&store, profile()).await.unwrap();

        assert_eq!(status.current_step, Step::VerifyPhone);
        assert_eq!(status.accessible_steps, vec![Step::Profile, Step::VerifyPhone]);
        assert!(outbox.last_code_for(PHONE).await.is_some());
    }

    #[tokio::test]
    async fn test_invalid_profile_leaves_flow_unchanged() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let store = started(&machine).await;

        let mut submission = profile();
        submission.email = Some("not-an-email".into());
        submission.first_name = None;

        match machine.submit_profile(&store, submission).await {
            Err(FlowError::ValidationFailed(fields)) => {
                assert!(fields.get("email").is_some());
                assert!(fields.get("first_name").is_some());
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert_eq!(store.current_step().await.unwrap(), Step::Profile);
        assert!(store.read(StepKey::Profile).await.unwrap().is_none());
        assert_eq!(outbox.code_count().await, 0);
    }

    #[tokio::test]
    async fn test_wrong_code_is_mismatch() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let store = started(&machine).await;
        machine.submit_profile(&store, profile()).await.unwrap();

        let code = outbox.last_code_for(PHONE).await.unwrap();
        let wrong = if code == "0000" { "1111" } else { "0000" };

        assert!(matches!(
            machine.submit_phone_code(&store, wrong).await,
            Err(FlowError::ChallengeMismatch)
        ));
        assert_eq!(store.current_step().await.unwrap(), Step::VerifyPhone);
        assert!(matches!(
            machine.submit_phone_code(&store, "").await,
            Err(FlowError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_set_pin_requires_verified_phone() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let store = started(&machine).await;
        machine.submit_profile(&store, profile()).await.unwrap();

        assert!(matches!(
            machine.submit_pin(&store, "4821").await,
            Err(FlowError::StepNotAccessible(Step::SetPin))
        ));
        assert!(store.read(StepKey::Pin).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_pin_rejected() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let store = started(&machine).await;
        machine.submit_profile(&store, profile()).await.unwrap();
        let code = outbox.last_code_for(PHONE).await.unwrap();
        machine.submit_phone_code(&store, &code).await.unwrap();

        for bad in ["123", "12345", "12a4", "", "١٢٣٤"] {
            assert!(
                matches!(
                    machine.submit_pin(&store, bad).await,
                    Err(FlowError::ValidationFailed(_))
                ),
                "pin {:?} should be rejected",
                bad
            );
        }
        assert_eq!(store.current_step().await.unwrap(), Step::SetPin);
    }

    #[tokio::test]
    async fn test_latest_pin_wins() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let store = started(&machine).await;
        machine.submit_profile(&store, profile()).await.unwrap();
        let code = outbox.last_code_for(PHONE).await.unwrap();
        machine.submit_phone_code(&store, &code).await.unwrap();

        machine.submit_pin(&store, "1111").await.unwrap();
        machine.submit_pin(&store, "2222").await.unwrap();

        assert!(matches!(
            machine.submit_pin_confirmation(&store, "1111").await,
            Err(FlowError::PinMismatch)
        ));
        match store.read(StepKey::Pin).await.unwrap() {
            Some(StepData::Pin(pin)) => assert_eq!(pin.temporary, "2222"),
            other => panic!("unexpected pin slot: {:?}", other),
        }

        let provisioned = machine.submit_pin_confirmation(&store, "2222").await.unwrap();
        assert!(provisioned.account.pin.verify("2222"));
    }

    #[tokio::test]
    async fn test_resend_requires_profile() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let store = started(&machine).await;

        assert!(matches!(
            machine.resend_code(&store).await,
            Err(FlowError::StepNotAccessible(Step::VerifyPhone))
        ));

        machine.submit_profile(&store, profile()).await.unwrap();
        let status = machine.resend_code(&store).await.unwrap();
        assert_eq!(status.current_step, Step::VerifyPhone);
        assert_eq!(outbox.code_count().await, 2);
    }

    #[tokio::test]
    async fn test_submit_dispatches_by_step() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let store = started(&machine).await;

        let submission: StepSubmission = serde_json::from_value(serde_json::json!({
            "step": "profile",
            "first_name": "John",
            "last_name": "Doe",
            "email": "john@example.com",
            "birthdate": "2008-04-12",
            "phone_number": "+14155551234"
        }))
        .unwrap();
        assert_eq!(submission.step(), Step::Profile);

        match machine.submit(&store, submission).await.unwrap() {
            SubmitOutcome::Advanced(status) => assert_eq!(status.current_step, Step::VerifyPhone),
            SubmitOutcome::Finished(_) => panic!("profile step cannot finish a flow"),
        }

        let code = outbox.last_code_for(PHONE).await.unwrap();
        machine
            .submit(&store, StepSubmission::VerifyPhone { code })
            .await
            .unwrap();
        machine
            .submit(&store, StepSubmission::SetPin { pin: "4821".into() })
            .await
            .unwrap();
        let outcome = machine
            .submit(&store, StepSubmission::ConfirmPin { pin: "4821".into() })
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Finished(_)));
    }

    #[tokio::test]
    async fn test_status_of_missing_flow() {
        let outbox = Outbox::new();
        let machine = machine(&outbox);
        let repository = FlowRepository::memory();
        let store = repository.bind(crate::store::FlowHandle::generate());

        assert!(matches!(machine.status(&store).await, Err(FlowError::NotFound)));
    }
}
