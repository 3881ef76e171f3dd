//! Error types for the registration flow.

use crate::types::Step;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Field-level validation messages, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for a single failing field.
    pub fn single(field: &str, message: &str) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record a message against a field.
    pub fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages recorded for a field, if any.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Names of the failing fields.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(())` when empty, otherwise the errors themselves.
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|(field, messages)| format!("{} {}", field, messages.join(", ")))
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

/// Registration flow errors.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Registration flow not found")]
    NotFound,

    #[error("Registration flow expired")]
    Expired,

    #[error("Step not accessible: {0}")]
    StepNotAccessible(Step),

    #[error("Validation failed: {0}")]
    ValidationFailed(FieldErrors),

    #[error("Verification code does not match")]
    ChallengeMismatch,

    #[error("PIN confirmation does not match")]
    PinMismatch,

    #[error("Account could not be provisioned: {0}")]
    ProvisioningFailed(FieldErrors),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Whether the flow is still usable after this error.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            FlowError::StepNotAccessible(_)
                | FlowError::ValidationFailed(_)
                | FlowError::ChallengeMismatch
                | FlowError::PinMismatch
                | FlowError::ProvisioningFailed(_)
        )
    }
}

impl From<std::io::Error> for FlowError {
    fn from(e: std::io::Error) -> Self {
        FlowError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Storage(format!("JSON serialization error: {}", e))
    }
}

impl From<aes_gcm::Error> for FlowError {
    fn from(_: aes_gcm::Error) -> Self {
        FlowError::Encryption("AES-GCM encryption/decryption failed".to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for FlowError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        FlowError::Credential(e.to_string())
    }
}
