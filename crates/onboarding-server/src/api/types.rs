//! API request and response types.

use onboarding_core::{
    AccountStatus, FlowHandle, FlowStatus, JoinToken, ProfileSubmission, ProvisionedAccount,
    RegistrationKind, Role,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to start a registration flow.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub kind: RegistrationKind,

    /// Class invite; takes precedence over `school_token`
    #[serde(default)]
    pub class_token: Option<String>,

    #[serde(default)]
    pub school_token: Option<String>,
}

impl StartRequest {
    pub fn join_token(&self) -> Option<JoinToken> {
        JoinToken::from_fields(self.class_token.as_deref(), self.school_token.as_deref())
    }
}

/// A flow started through the handle-addressed API.
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub handle: FlowHandle,
    #[serde(flatten)]
    pub status: FlowStatus,
}

#[derive(Debug, Deserialize)]
pub struct HandleRequest {
    pub handle: FlowHandle,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub handle: FlowHandle,
    #[serde(flatten)]
    pub profile: ProfileSubmission,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub handle: FlowHandle,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub handle: FlowHandle,
    #[serde(default)]
    pub pin: String,
}

/// Verification code body for the web surface.
#[derive(Debug, Deserialize)]
pub struct CodeBody {
    #[serde(default)]
    pub code: String,
}

/// PIN body for the web surface.
#[derive(Debug, Deserialize)]
pub struct PinBody {
    #[serde(default)]
    pub pin: String,
}

/// Terminal response once the account exists.
#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub account_id: Uuid,
    pub email: String,
    pub role: Option<Role>,
    pub status: AccountStatus,
    pub school_id: Option<String>,
    pub access_token: String,
}

impl From<ProvisionedAccount> for RegistrationResponse {
    fn from(provisioned: ProvisionedAccount) -> Self {
        let role = provisioned.account.primary_role();
        let account = provisioned.account;
        Self {
            account_id: account.id,
            email: account.email,
            role,
            status: account.status,
            school_id: account.school_id,
            access_token: provisioned.access_token,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_flows: usize,
    pub persistent: bool,
}
