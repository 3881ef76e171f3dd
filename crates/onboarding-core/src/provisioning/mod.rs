//! Terminal step: turn a completed flow into exactly one account.

mod ledger;

pub use ledger::FinalizationLedger;

use crate::accounts::{Account, AccountStore, EnrollmentTarget, NewAccount, PinCredential};
use crate::credential::CredentialIssuer;
use crate::error::{FieldErrors, FlowError};
use crate::flow::{validate_pin, RegistrationFlow};
use crate::invites::{InviteBinding, InviteTokenResolver};
use crate::notify::{
    ConfirmationDispatcher, NotificationContext, NotificationKind, NotificationSink,
};
use crate::store::FlowStore;
use crate::types::{AccountStatus, RegistrationKind};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A provisioned account plus its first access credential.
#[derive(Debug, Clone)]
pub struct ProvisionedAccount {
    pub account: Account,
    pub access_token: String,
}

/// Creates accounts from completed flows.
pub struct ProvisioningService {
    accounts: Arc<dyn AccountStore>,
    invites: Arc<dyn InviteTokenResolver>,
    notifications: Arc<dyn NotificationSink>,
    confirmation: Arc<dyn ConfirmationDispatcher>,
    credentials: Arc<dyn CredentialIssuer>,
    ledger: Arc<FinalizationLedger>,
}

impl ProvisioningService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        invites: Arc<dyn InviteTokenResolver>,
        notifications: Arc<dyn NotificationSink>,
        confirmation: Arc<dyn ConfirmationDispatcher>,
        credentials: Arc<dyn CredentialIssuer>,
    ) -> Self {
        Self {
            accounts,
            invites,
            notifications,
            confirmation,
            credentials,
            ledger: Arc::new(FinalizationLedger::new()),
        }
    }

    pub fn ledger(&self) -> Arc<FinalizationLedger> {
        self.ledger.clone()
    }

    pub async fn is_finalized(&self, flow_id: Uuid) -> bool {
        self.ledger.is_finalized(flow_id).await
    }

    /// Finalize a flow whose PIN confirmation matched.
    ///
    /// At most one call per flow id gets past the ledger claim. On failure the claim is
    /// released and the flow is left in place.
    #[instrument(skip(self, store, flow), fields(flow_id = %flow.id, kind = ?flow.kind))]
    pub async fn finalize(
        &self,
        store: &dyn FlowStore,
        flow: &RegistrationFlow,
    ) -> Result<ProvisionedAccount, FlowError> {
        self.ledger.claim(flow.id).await?;

        let account = match self.provision(flow).await {
            Ok(account) => account,
            Err(e) => {
                self.ledger.release(flow.id).await;
                warn!(error = %e, "Provisioning failed, flow kept");
                return Err(e);
            }
        };

        self.ledger.complete(flow.id, flow.expires_at).await;
        if let Err(e) = store.destroy().await {
            // The tombstone already blocks reuse of the flow.
            warn!(error = %e, "Failed to destroy finalized flow");
        }

        let access_token = self.credentials.issue(&account)?;

        info!(
            account_id = %account.id,
            status = ?account.status,
            "Registration finalized"
        );
        Ok(ProvisionedAccount {
            account,
            access_token,
        })
    }

    async fn provision(&self, flow: &RegistrationFlow) -> Result<Account, FlowError> {
        let draft = Self::draft(flow)?;

        if self.accounts.find_by_email(&draft.email).await?.is_some() {
            return Err(FlowError::ProvisioningFailed(FieldErrors::single(
                "email",
                "has already been taken",
            )));
        }

        let mut account = self.accounts.create(draft).await?;

        if let Some(binding) = self.resolve_binding(flow).await {
            self.enroll(&mut account, flow.kind, binding).await;
        }

        if let Err(e) = self.confirmation.send(&account).await {
            warn!(account_id = %account.id, error = %e, "Confirmation dispatch failed");
        }

        Ok(account)
    }

    /// Check the accumulated step data and build the account draft.
    fn draft(flow: &RegistrationFlow) -> Result<NewAccount, FlowError> {
        let mut errors = FieldErrors::new();

        let profile = flow.profile.as_ref();
        if profile.is_none() {
            errors.add("profile", "is missing");
        }

        let verified = match (profile, flow.phone.as_ref()) {
            (Some(profile), Some(phone)) => phone.verified && phone.number == profile.phone_number,
            _ => false,
        };
        if !verified {
            errors.add("phone_number", "is not verified");
        }

        let pin = flow.temporary_pin();
        match pin {
            None => errors.add("pin", "can't be blank"),
            Some(pin) if validate_pin(pin).is_err() => errors.add("pin", "is invalid"),
            Some(_) => {}
        }

        errors.into_result().map_err(FlowError::ProvisioningFailed)?;

        let (Some(profile), Some(pin)) = (profile, pin) else {
            return Err(FlowError::Internal("incomplete flow passed validation".into()));
        };

        let mut draft = NewAccount::new(
            profile.email.clone(),
            profile.first_name.clone(),
            profile.last_name.clone(),
            profile.birthdate,
            profile.phone_number.clone(),
            PinCredential::from_pin(pin),
        );
        draft.assign_role(flow.kind.role()).map_err(|conflict| {
            FlowError::ProvisioningFailed(FieldErrors::single("roles", &conflict.to_string()))
        })?;

        Ok(draft)
    }

    /// Resolve the flow's join token. Any failure means no affiliation.
    async fn resolve_binding(&self, flow: &RegistrationFlow) -> Option<InviteBinding> {
        let token = flow.join_token.as_ref()?;

        match self.invites.resolve(token).await {
            Ok(Some(binding)) if flow.kind == RegistrationKind::Student && binding.class_id.is_none() => {
                warn!(token_kind = ?token.kind, "Student join token names no class, registering without affiliation");
                None
            }
            Ok(Some(binding)) => Some(binding),
            Ok(None) => {
                warn!(token_kind = ?token.kind, "Join token did not resolve, registering without affiliation");
                None
            }
            Err(e) => {
                warn!(token_kind = ?token.kind, error = %e, "Join token lookup failed, registering without affiliation");
                None
            }
        }
    }

    /// Create the pending enrollment and notify its approvers. Failures are logged only.
    async fn enroll(&self, account: &mut Account, kind: RegistrationKind, binding: InviteBinding) {
        let (target, notification) = match kind {
            RegistrationKind::Student => (
                EnrollmentTarget::from_binding(&binding),
                NotificationKind::ClassJoinRequested,
            ),
            RegistrationKind::Teacher => (
                EnrollmentTarget::School {
                    school_id: binding.school_id.clone(),
                },
                NotificationKind::SchoolJoinRequested,
            ),
        };

        let enrollment = match self.accounts.create_enrollment(account.id, target).await {
            Ok(enrollment) => enrollment,
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "Enrollment failed, account left without affiliation");
                return;
            }
        };

        account.status = AccountStatus::PendingApproval;
        account.school_id = Some(enrollment.target.school_id().to_string());

        let class_id = match &enrollment.target {
            EnrollmentTarget::Class { class_id, .. } => Some(class_id.clone()),
            EnrollmentTarget::School { .. } => None,
        };
        self.notifications
            .dispatch(
                notification,
                account,
                NotificationContext {
                    enrollment_id: enrollment.id,
                    school_id: binding.school_id,
                    class_id,
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountError, MemoryAccountStore, MockAccountStore};
    use crate::credential::JwtIssuer;
    use crate::delivery::Outbox;
    use crate::flow::{PhonePatch, PinData, ProfileData, StepPayload};
    use crate::invites::StaticInviteResolver;
    use crate::notify::{MessageConfirmation, RecordingNotifications};
    use crate::store::FlowRepository;
    use crate::types::{JoinToken, Role};
    use chrono::{Duration, NaiveDate};
    use secrecy::SecretString;

    struct Harness {
        service: ProvisioningService,
        accounts: MemoryAccountStore,
        notifications: RecordingNotifications,
        outbox: Outbox,
    }

    fn harness() -> Harness {
        let accounts = MemoryAccountStore::new();
        let notifications = RecordingNotifications::new();
        let outbox = Outbox::new();
        let service = service_with(Arc::new(accounts.clone()), &notifications, &outbox);
        Harness {
            service,
            accounts,
            notifications,
            outbox,
        }
    }

    fn service_with(
        accounts: Arc<dyn AccountStore>,
        notifications: &RecordingNotifications,
        outbox: &Outbox,
    ) -> ProvisioningService {
        let invites = StaticInviteResolver::new()
            .with_class("class-token", "school-1", "class-7")
            .with_school("school-token", "school-1");
        ProvisioningService::new(
            accounts,
            Arc::new(invites),
            Arc::new(notifications.clone()),
            Arc::new(MessageConfirmation::new(Arc::new(outbox.clone()))),
            Arc::new(JwtIssuer::new(
                &SecretString::new("jwt-secret".to_string()),
                "onboarding",
                Duration::hours(1),
            )),
        )
    }

    fn completed_flow(kind: RegistrationKind, token: Option<JoinToken>) -> RegistrationFlow {
        let mut flow = RegistrationFlow::new(kind, token, Duration::minutes(30));
        flow.apply(StepPayload::Profile(ProfileData {
            first_name: "John".into(),
            last_name: "Doe".into(),
            email: "john@example.com".into(),
            birthdate: NaiveDate::from_ymd_opt(2008, 4, 12).unwrap(),
            phone_number: "+14155551234".into(),
        }));
        flow.apply(StepPayload::Phone(PhonePatch::issued("+14155551234", "0042")));
        flow.apply(StepPayload::Phone(PhonePatch::verified("+14155551234")));
        flow.apply(StepPayload::Pin(PinData::new("4821")));
        flow
    }

    async fn stored(flow: &RegistrationFlow) -> (FlowRepository, crate::store::PersistedFlowStore) {
        let repository = FlowRepository::memory();
        let handle = repository.create(flow.clone()).await.unwrap();
        let store = repository.bind(handle);
        (repository, store)
    }

    #[tokio::test]
    async fn test_student_with_class_token() {
        let h = harness();
        let flow = completed_flow(RegistrationKind::Student, Some(JoinToken::class("class-token")));
        let (_repository, store) = stored(&flow).await;

        let provisioned = h.service.finalize(&store, &flow).await.unwrap();

        assert_eq!(provisioned.account.roles, vec![Role::Student]);
        assert_eq!(provisioned.account.status, AccountStatus::PendingApproval);
        assert_eq!(provisioned.account.school_id.as_deref(), Some("school-1"));
        assert!(provisioned.account.pin.verify("4821"));
        assert!(!provisioned.access_token.is_empty());

        let enrollments = h.accounts.enrollments().await;
        assert_eq!(enrollments.len(), 1);
        assert_eq!(
            enrollments[0].target,
            EnrollmentTarget::Class {
                school_id: "school-1".into(),
                class_id: "class-7".into()
            }
        );

        let sent = h.notifications.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::ClassJoinRequested);

        assert_eq!(h.outbox.messages().await.len(), 1);
        assert!(store.load().await.unwrap().is_none());
        assert!(h.service.is_finalized(flow.id).await);
    }

    #[tokio::test]
    async fn test_teacher_with_school_token() {
        let h = harness();
        let flow = completed_flow(RegistrationKind::Teacher, Some(JoinToken::school("school-token")));
        let (_repository, store) = stored(&flow).await;

        let provisioned = h.service.finalize(&store, &flow).await.unwrap();

        assert_eq!(provisioned.account.roles, vec![Role::Teacher]);
        assert_eq!(provisioned.account.status, AccountStatus::PendingApproval);
        let sent = h.notifications.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::SchoolJoinRequested);
        assert_eq!(sent[0].context.class_id, None);
    }

    #[tokio::test]
    async fn test_unknown_token_degrades_to_unaffiliated() {
        let h = harness();
        let flow = completed_flow(RegistrationKind::Student, Some(JoinToken::class("bogus")));
        let (_repository, store) = stored(&flow).await;

        let provisioned = h.service.finalize(&store, &flow).await.unwrap();

        assert_eq!(provisioned.account.status, AccountStatus::Active);
        assert_eq!(provisioned.account.school_id, None);
        assert!(h.accounts.enrollments().await.is_empty());
        assert!(h.notifications.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_student_with_school_token_is_unaffiliated() {
        let h = harness();
        let flow = completed_flow(RegistrationKind::Student, Some(JoinToken::school("school-token")));
        let (_repository, store) = stored(&flow).await;

        let provisioned = h.service.finalize(&store, &flow).await.unwrap();
        assert_eq!(provisioned.account.status, AccountStatus::Active);
        assert!(h.notifications.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_finalize_is_not_found() {
        let h = harness();
        let flow = completed_flow(RegistrationKind::Student, None);
        let (_repository, store) = stored(&flow).await;

        h.service.finalize(&store, &flow).await.unwrap();
        let again = h.service.finalize(&store, &flow).await;

        assert!(matches!(again, Err(FlowError::NotFound)));
        assert_eq!(h.accounts.count().await, 1);
    }

    #[tokio::test]
    async fn test_unverified_phone_fails_and_keeps_flow() {
        let h = harness();
        let mut flow = completed_flow(RegistrationKind::Student, None);
        flow.apply(StepPayload::Phone(PhonePatch::issued("+14155559999", "1111")));
        let (_repository, store) = stored(&flow).await;

        match h.service.finalize(&store, &flow).await {
            Err(FlowError::ProvisioningFailed(fields)) => {
                assert!(fields.get("phone_number").is_some());
            }
            other => panic!("expected provisioning failure, got {:?}", other),
        }
        assert!(store.load().await.unwrap().is_some());
        assert_eq!(h.accounts.count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_email_fails_and_releases_claim() {
        let h = harness();
        let first = completed_flow(RegistrationKind::Teacher, None);
        let (_r1, store1) = stored(&first).await;
        h.service.finalize(&store1, &first).await.unwrap();

        let second = completed_flow(RegistrationKind::Student, None);
        let (_r2, store2) = stored(&second).await;
        for _ in 0..2 {
            match h.service.finalize(&store2, &second).await {
                Err(FlowError::ProvisioningFailed(fields)) => {
                    assert_eq!(fields.get("email").unwrap(), ["has already been taken"]);
                }
                other => panic!("expected provisioning failure, got {:?}", other),
            }
        }
        assert!(store2.load().await.unwrap().is_some());
        assert_eq!(h.accounts.count().await, 1);
    }

    #[tokio::test]
    async fn test_account_store_outage_is_storage_error() {
        let mut accounts = MockAccountStore::new();
        accounts.expect_find_by_email().returning(|_| Ok(None));
        accounts
            .expect_create()
            .times(1)
            .returning(|_| Err(AccountError::Unavailable("connection refused".into())));

        let service = service_with(Arc::new(accounts), &RecordingNotifications::new(), &Outbox::new());
        let flow = completed_flow(RegistrationKind::Student, None);
        let (_repository, store) = stored(&flow).await;

        let result = service.finalize(&store, &flow).await;
        assert!(matches!(result, Err(FlowError::Storage(_))));
        assert!(!service.is_finalized(flow.id).await);
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_enrollment_failure_is_downgraded() {
        let mut accounts = MockAccountStore::new();
        accounts.expect_find_by_email().returning(|_| Ok(None));
        accounts.expect_create().times(1).returning(|draft| {
            Ok(Account {
                id: Uuid::new_v4(),
                roles: draft.roles().to_vec(),
                email: draft.email,
                first_name: draft.first_name,
                last_name: draft.last_name,
                birthdate: draft.birthdate,
                phone_number: draft.phone_number,
                pin: draft.pin,
                status: AccountStatus::Active,
                school_id: None,
                created_at: chrono::Utc::now(),
            })
        });
        accounts
            .expect_create_enrollment()
            .times(1)
            .returning(|id, _| Err(AccountError::NotFound(id)));

        let notifications = RecordingNotifications::new();
        let service = service_with(Arc::new(accounts), &notifications, &Outbox::new());
        let flow = completed_flow(RegistrationKind::Student, Some(JoinToken::class("class-token")));
        let (_repository, store) = stored(&flow).await;

        let provisioned = service.finalize(&store, &flow).await.unwrap();
        assert_eq!(provisioned.account.status, AccountStatus::Active);
        assert_eq!(provisioned.account.school_id, None);
        assert!(notifications.sent().await.is_empty());
        assert!(store.load().await.unwrap().is_none());
    }
}
