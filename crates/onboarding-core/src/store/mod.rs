//! Flow storage: one interface, addressed either by handle or by the caller's session.

mod encrypted;
mod persisted;
mod registry;

pub use encrypted::{Backend, EncryptedBackend, MemoryBackend};
pub use persisted::{FlowRepository, PersistedFlowStore};
pub use registry::FlowRegistry;

use crate::error::FlowError;
use crate::flow::{FlowUpdate, RegistrationFlow, StepData};
use crate::types::{Step, StepKey};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Opaque identifier handed to API clients for a persisted flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowHandle(String);

impl FlowHandle {
    /// Fresh random handle (32 bytes, hex encoded).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for a single registration flow.
///
/// An instance is already bound to one flow address, so the state machine never sees how the
/// flow is located.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Load the flow. `None` if it never existed or has been destroyed.
    async fn load(&self) -> Result<Option<RegistrationFlow>, FlowError>;

    /// Atomically apply an update and return the resulting flow.
    ///
    /// Fails with [`FlowError::NotFound`] if there is no flow.
    async fn write(&self, update: FlowUpdate) -> Result<RegistrationFlow, FlowError>;

    /// Remove the flow, returning it if it was present.
    async fn destroy(&self) -> Result<Option<RegistrationFlow>, FlowError>;

    /// Read one step slot.
    async fn read(&self, key: StepKey) -> Result<Option<StepData>, FlowError> {
        Ok(self.load().await?.and_then(|flow| flow.read(key)))
    }

    async fn current_step(&self) -> Result<Step, FlowError> {
        self.load()
            .await?
            .map(|flow| flow.current_step)
            .ok_or(FlowError::NotFound)
    }

    async fn is_expired(&self) -> Result<bool, FlowError> {
        self.load()
            .await?
            .map(|flow| flow.is_expired())
            .ok_or(FlowError::NotFound)
    }
}
