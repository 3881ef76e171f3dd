//! Accounts, enrollments and the account store.

use crate::error::{FieldErrors, FlowError};
use crate::invites::InviteBinding;
use crate::types::{AccountStatus, Role};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Salted SHA-256 digest of a PIN. The raw PIN is never stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCredential {
    salt: String,
    digest: String,
}

impl PinCredential {
    pub fn from_pin(pin: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let digest = Self::digest(&salt, pin);
        Self { salt, digest }
    }

    pub fn verify(&self, pin: &str) -> bool {
        let candidate = Self::digest(&self.salt, pin);
        candidate.len() == self.digest.len()
            && candidate.as_bytes().ct_eq(self.digest.as_bytes()).into()
    }

    fn digest(salt: &str, pin: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(pin.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Debug for PinCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PinCredential(..)")
    }
}

/// Raised when a role cannot coexist with the roles already held.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("role {requested} cannot be combined with {held}")]
pub struct RoleConflict {
    pub requested: Role,
    pub held: Role,
}

/// An account that has not been saved yet.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: NaiveDate,
    pub phone_number: String,
    pub pin: PinCredential,
    roles: Vec<Role>,
}

impl NewAccount {
    pub fn new(
        email: String,
        first_name: String,
        last_name: String,
        birthdate: NaiveDate,
        phone_number: String,
        pin: PinCredential,
    ) -> Self {
        Self {
            email,
            first_name,
            last_name,
            birthdate,
            phone_number,
            pin,
            roles: Vec::new(),
        }
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Add a role. A student holds no other role, and no other role joins a student.
    pub fn assign_role(&mut self, role: Role) -> Result<(), RoleConflict> {
        if self.roles.contains(&role) {
            return Ok(());
        }
        if let Some(held) = self
            .roles
            .iter()
            .copied()
            .find(|held| *held == Role::Student || role == Role::Student)
        {
            return Err(RoleConflict {
                requested: role,
                held,
            });
        }
        self.roles.push(role);
        Ok(())
    }
}

/// A saved account.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: NaiveDate,
    pub phone_number: String,
    #[serde(skip)]
    pub pin: PinCredential,
    pub roles: Vec<Role>,
    pub status: AccountStatus,
    pub school_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// The role assigned at registration.
    pub fn primary_role(&self) -> Option<Role> {
        self.roles.first().copied()
    }
}

/// What an enrollment attaches the account to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EnrollmentTarget {
    Class { school_id: String, class_id: String },
    School { school_id: String },
}

impl EnrollmentTarget {
    pub fn school_id(&self) -> &str {
        match self {
            EnrollmentTarget::Class { school_id, .. } | EnrollmentTarget::School { school_id } => {
                school_id
            }
        }
    }

    /// Class enrollment when the binding names a class, school enrollment otherwise.
    pub fn from_binding(binding: &InviteBinding) -> Self {
        match &binding.class_id {
            Some(class_id) => EnrollmentTarget::Class {
                school_id: binding.school_id.clone(),
                class_id: class_id.clone(),
            },
            None => EnrollmentTarget::School {
                school_id: binding.school_id.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Pending,
    Approved,
}

/// Binding of an account to a class or school, awaiting approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub account_id: Uuid,
    pub target: EnrollmentTarget,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
}

/// Account store errors.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Invalid account: {0}")]
    Invalid(FieldErrors),

    #[error("Account not found: {0}")]
    NotFound(Uuid),

    #[error("Account store unavailable: {0}")]
    Unavailable(String),
}

impl From<AccountError> for FlowError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Invalid(fields) => FlowError::ProvisioningFailed(fields),
            other => FlowError::Storage(other.to_string()),
        }
    }
}

/// Persistent account store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Save a new account. Emails are unique.
    async fn create(&self, draft: NewAccount) -> Result<Account, AccountError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountError>;

    /// Create a pending enrollment. The account moves to `pending_approval` and takes
    /// the target's school.
    async fn create_enrollment(
        &self,
        account_id: Uuid,
        target: EnrollmentTarget,
    ) -> Result<Enrollment, AccountError>;
}

#[derive(Default)]
struct Directory {
    accounts: HashMap<Uuid, Account>,
    by_email: HashMap<String, Uuid>,
    enrollments: Vec<Enrollment>,
}

/// In-process account store.
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    inner: Arc<RwLock<Directory>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.accounts.len()
    }

    pub async fn get(&self, id: Uuid) -> Option<Account> {
        self.inner.read().await.accounts.get(&id).cloned()
    }

    pub async fn enrollments(&self) -> Vec<Enrollment> {
        self.inner.read().await.enrollments.clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create(&self, draft: NewAccount) -> Result<Account, AccountError> {
        let mut errors = FieldErrors::new();
        if draft.roles.is_empty() {
            errors.add("roles", "can't be blank");
        }

        let mut directory = self.inner.write().await;
        if directory.by_email.contains_key(&draft.email) {
            errors.add("email", "has already been taken");
        }
        errors.into_result().map_err(AccountError::Invalid)?;

        let account = Account {
            id: Uuid::new_v4(),
            email: draft.email,
            first_name: draft.first_name,
            last_name: draft.last_name,
            birthdate: draft.birthdate,
            phone_number: draft.phone_number,
            pin: draft.pin,
            roles: draft.roles,
            status: AccountStatus::Active,
            school_id: None,
            created_at: Utc::now(),
        };

        directory.by_email.insert(account.email.clone(), account.id);
        directory.accounts.insert(account.id, account.clone());

        info!(account_id = %account.id, "Account created");
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountError> {
        let directory = self.inner.read().await;
        Ok(directory
            .by_email
            .get(email)
            .and_then(|id| directory.accounts.get(id))
            .cloned())
    }

    async fn create_enrollment(
        &self,
        account_id: Uuid,
        target: EnrollmentTarget,
    ) -> Result<Enrollment, AccountError> {
        let mut directory = self.inner.write().await;
        let account = directory
            .accounts
            .get_mut(&account_id)
            .ok_or(AccountError::NotFound(account_id))?;

        account.status = AccountStatus::PendingApproval;
        account.school_id = Some(target.school_id().to_string());

        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            account_id,
            target,
            status: EnrollmentStatus::Pending,
            created_at: Utc::now(),
        };
        directory.enrollments.push(enrollment.clone());

        debug!(%account_id, enrollment_id = %enrollment.id, "Pending enrollment created");
        Ok(enrollment)
    }
}
