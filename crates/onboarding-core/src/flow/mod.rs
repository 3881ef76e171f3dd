//! The registration flow record and its step data.

mod validation;

pub use validation::{
    mask_phone, normalize_email, normalize_phone_number, validate_pin, validate_profile,
    validate_profile_on, ProfileSubmission, PIN_LENGTH,
};

use crate::types::{JoinToken, MergeStrategy, RegistrationKind, Step, StepKey};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default flow lifetime.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Validated profile captured by the first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileData {
    pub first_name: String,
    pub last_name: String,
    /// Lower-cased email
    pub email: String,
    pub birthdate: NaiveDate,
    /// Phone number in E.164 format
    pub phone_number: String,
}

/// Phone verification state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneData {
    pub number: String,
    /// Most recently issued challenge code
    pub code: Option<String>,
    pub code_issued_at: Option<DateTime<Utc>>,
    pub verified: bool,
}

/// Partial update to the phone record. Unset fields keep their stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhonePatch {
    pub number: String,
    pub code: Option<String>,
    pub verified: Option<bool>,
}

impl PhonePatch {
    pub fn issued(number: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            code: Some(code.into()),
            verified: None,
        }
    }

    pub fn verified(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            code: None,
            verified: Some(true),
        }
    }
}

/// Temporary PIN chosen at `set_pin`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinData {
    pub temporary: String,
    pub set_at: DateTime<Utc>,
}

impl PinData {
    pub fn new(pin: impl Into<String>) -> Self {
        Self {
            temporary: pin.into(),
            set_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for PinData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinData")
            .field("temporary", &"****")
            .field("set_at", &self.set_at)
            .finish()
    }
}

/// A payload written to one step slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPayload {
    Profile(ProfileData),
    Phone(PhonePatch),
    Pin(PinData),
}

impl StepPayload {
    pub fn key(&self) -> StepKey {
        match self {
            StepPayload::Profile(_) => StepKey::Profile,
            StepPayload::Phone(_) => StepKey::Phone,
            StepPayload::Pin(_) => StepKey::Pin,
        }
    }
}

/// One atomic mutation of a flow: a step payload, an optional forward move and an
/// optional join token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowUpdate {
    pub payload: StepPayload,
    pub advance_to: Option<Step>,
    pub join_token: Option<JoinToken>,
}

impl FlowUpdate {
    pub fn new(payload: StepPayload) -> Self {
        Self {
            payload,
            advance_to: None,
            join_token: None,
        }
    }

    pub fn advancing_to(mut self, step: Step) -> Self {
        self.advance_to = Some(step);
        self
    }

    pub fn with_join_token(mut self, token: Option<JoinToken>) -> Self {
        self.join_token = token;
        self
    }
}

/// A stored step slot, as read back from a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepData {
    Profile(ProfileData),
    Phone(PhoneData),
    Pin(PinData),
}

/// An in-progress registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationFlow {
    pub id: Uuid,
    pub kind: RegistrationKind,
    pub current_step: Step,
    pub profile: Option<ProfileData>,
    pub phone: Option<PhoneData>,
    pub pin: Option<PinData>,
    pub join_token: Option<JoinToken>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RegistrationFlow {
    /// Start a new flow. `expires_at` is fixed here and never extended.
    pub fn new(kind: RegistrationKind, join_token: Option<JoinToken>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            current_step: Step::Profile,
            profile: None,
            phone: None,
            pin: None,
            join_token,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn phone_verified(&self) -> bool {
        self.phone.as_ref().is_some_and(|p| p.verified)
    }

    pub fn temporary_pin(&self) -> Option<&str> {
        self.pin.as_ref().map(|p| p.temporary.as_str())
    }

    /// Whether `step` may be submitted, derived from written step data only.
    pub fn can_access(&self, step: Step) -> bool {
        match step {
            Step::Profile => true,
            Step::VerifyPhone => self.profile.is_some(),
            Step::SetPin => self.phone_verified(),
            Step::ConfirmPin => self.phone_verified() && self.pin.is_some(),
            Step::Finished => self.pin.is_some(),
        }
    }

    pub fn accessible_steps(&self) -> Vec<Step> {
        Step::ALL
            .into_iter()
            .filter(|step| self.can_access(*step))
            .collect()
    }

    /// Move `current_step` forward. Never regresses.
    pub fn advance_to(&mut self, step: Step) {
        if step > self.current_step {
            self.current_step = step;
        }
    }

    /// Read one step slot.
    pub fn read(&self, key: StepKey) -> Option<StepData> {
        match key {
            StepKey::Profile => self.profile.clone().map(StepData::Profile),
            StepKey::Phone => self.phone.clone().map(StepData::Phone),
            StepKey::Pin => self.pin.clone().map(StepData::Pin),
        }
    }

    /// Write one step slot following the per-step merge table.
    pub fn apply(&mut self, payload: StepPayload) {
        let strategy = payload.key().merge_strategy();
        match payload {
            StepPayload::Profile(profile) => self.profile = Some(profile),
            StepPayload::Pin(pin) => self.pin = Some(pin),
            StepPayload::Phone(patch) => {
                if strategy == MergeStrategy::Replace {
                    self.phone = None;
                }
                self.merge_phone(patch);
            }
        }
    }

    /// Apply a whole update. A join token in the update replaces the stored one.
    pub fn apply_update(&mut self, update: FlowUpdate) {
        self.apply(update.payload);
        if let Some(token) = update.join_token {
            self.join_token = Some(token);
        }
        if let Some(step) = update.advance_to {
            self.advance_to(step);
        }
    }

    fn merge_phone(&mut self, patch: PhonePatch) {
        // A different number starts a fresh record so a verification never carries over.
        let stale = self
            .phone
            .as_ref()
            .is_some_and(|stored| stored.number != patch.number);
        if stale {
            self.phone = None;
        }

        let phone = self.phone.get_or_insert_with(|| PhoneData {
            number: patch.number.clone(),
            code: None,
            code_issued_at: None,
            verified: false,
        });

        if let Some(code) = patch.code {
            phone.code = Some(code);
            phone.code_issued_at = Some(Utc::now());
        }
        if let Some(verified) = patch.verified {
            phone.verified = verified;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(phone: &str) -> ProfileData {
        ProfileData {
            first_name: "John".into(),
            last_name: "Doe".into(),
            email: "john@example.com".into(),
            birthdate: NaiveDate::from_ymd_opt(2008, 4, 12).unwrap(),
            phone_number: phone.into(),
        }
    }

    fn new_flow() -> RegistrationFlow {
        RegistrationFlow::new(
            RegistrationKind::Student,
            None,
            Duration::minutes(DEFAULT_TTL_MINUTES),
        )
    }

    #[test]
    fn test_new_flow_defaults() {
        let flow = new_flow();
        assert_eq!(flow.current_step, Step::Profile);
        assert_eq!(flow.expires_at - flow.created_at, Duration::minutes(30));
        assert!(!flow.is_expired());
        assert_eq!(flow.accessible_steps(), vec![Step::Profile]);
    }

    #[test]
    fn test_zero_ttl_is_expired() {
        let flow = RegistrationFlow::new(RegistrationKind::Teacher, None, Duration::zero());
        assert!(flow.is_expired());
    }

    #[test]
    fn test_access_derived_from_data() {
        let mut flow = new_flow();
        assert!(!flow.can_access(Step::VerifyPhone));

        flow.apply(StepPayload::Profile(profile("+14155551234")));
        assert!(flow.can_access(Step::VerifyPhone));
        assert!(!flow.can_access(Step::SetPin));

        flow.apply(StepPayload::Phone(PhonePatch::issued("+14155551234", "0042")));
        assert!(!flow.can_access(Step::SetPin));

        flow.apply(StepPayload::Phone(PhonePatch::verified("+14155551234")));
        assert!(flow.can_access(Step::SetPin));
        assert!(!flow.can_access(Step::ConfirmPin));
        assert!(!flow.can_access(Step::Finished));

        flow.apply(StepPayload::Pin(PinData::new("4821")));
        assert!(flow.can_access(Step::ConfirmPin));
        assert!(flow.can_access(Step::Finished));
    }

    #[test]
    fn test_advance_never_regresses() {
        let mut flow = new_flow();
        flow.advance_to(Step::SetPin);
        flow.advance_to(Step::VerifyPhone);
        assert_eq!(flow.current_step, Step::SetPin);
    }

    #[test]
    fn test_phone_merge_is_additive() {
        let mut flow = new_flow();
        flow.apply(StepPayload::Phone(PhonePatch::issued("+14155551234", "1111")));
        flow.apply(StepPayload::Phone(PhonePatch::verified("+14155551234")));

        let phone = flow.phone.as_ref().unwrap();
        assert_eq!(phone.code.as_deref(), Some("1111"));
        assert!(phone.verified);

        // Re-issuing for the same number keeps the verified flag
        flow.apply(StepPayload::Phone(PhonePatch::issued("+14155551234", "2222")));
        let phone = flow.phone.as_ref().unwrap();
        assert_eq!(phone.code.as_deref(), Some("2222"));
        assert!(phone.verified);
    }

    #[test]
    fn test_phone_change_resets_verification() {
        let mut flow = new_flow();
        flow.apply(StepPayload::Phone(PhonePatch::issued("+14155551234", "1111")));
        flow.apply(StepPayload::Phone(PhonePatch::verified("+14155551234")));

        flow.apply(StepPayload::Phone(PhonePatch::issued("+14155559999", "3333")));
        let phone = flow.phone.as_ref().unwrap();
        assert_eq!(phone.number, "+14155559999");
        assert_eq!(phone.code.as_deref(), Some("3333"));
        assert!(!phone.verified);
    }

    #[test]
    fn test_profile_replaces_wholesale() {
        let mut flow = new_flow();
        flow.apply(StepPayload::Profile(profile("+14155551234")));

        let mut updated = profile("+14155551234");
        updated.first_name = "Jane".into();
        flow.apply(StepPayload::Profile(updated.clone()));

        assert_eq!(flow.read(StepKey::Profile), Some(StepData::Profile(updated)));
    }

    #[test]
    fn test_pin_replaced_by_latest_set() {
        let mut flow = new_flow();
        flow.apply(StepPayload::Pin(PinData::new("1234")));
        flow.apply(StepPayload::Pin(PinData::new("5678")));
        assert_eq!(flow.temporary_pin(), Some("5678"));
    }

    #[test]
    fn test_apply_update_sets_token_and_advances() {
        let mut flow = new_flow();
        let update = FlowUpdate::new(StepPayload::Profile(profile("+14155551234")))
            .advancing_to(Step::VerifyPhone)
            .with_join_token(Some(JoinToken::class("abc")));
        flow.apply_update(update);

        assert_eq!(flow.current_step, Step::VerifyPhone);
        assert_eq!(flow.join_token, Some(JoinToken::class("abc")));

        // An update without a token keeps the captured one
        flow.apply_update(FlowUpdate::new(StepPayload::Profile(profile("+14155551234"))));
        assert_eq!(flow.join_token, Some(JoinToken::class("abc")));
    }

    #[test]
    fn test_pin_debug_is_redacted() {
        let rendered = format!("{:?}", PinData::new("4821"));
        assert!(!rendered.contains("4821"));
    }

    #[test]
    fn test_flow_serialization_round_trip() {
        let mut flow = new_flow();
        flow.apply(StepPayload::Profile(profile("+14155551234")));
        flow.join_token = Some(JoinToken::class("class-token"));

        let json = serde_json::to_string(&flow).unwrap();
        let restored: RegistrationFlow = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, flow.id);
        assert_eq!(restored.profile, flow.profile);
        assert_eq!(restored.join_token, flow.join_token);
    }
}
