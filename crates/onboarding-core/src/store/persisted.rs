//! Handle-addressed flow storage for API clients.

use super::{Backend, FlowHandle, FlowRegistry, FlowStore};
use crate::error::FlowError;
use crate::flow::{FlowUpdate, RegistrationFlow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Shared registry of persisted flows plus its write-through backend.
#[derive(Clone)]
pub struct FlowRepository {
    flows: Arc<RwLock<FlowRegistry>>,
    backend: Arc<Backend>,
}

impl FlowRepository {
    pub fn new(registry: FlowRegistry, backend: Backend) -> Self {
        Self {
            flows: Arc::new(RwLock::new(registry)),
            backend: Arc::new(backend),
        }
    }

    /// Empty, memory-only repository.
    pub fn memory() -> Self {
        Self::new(FlowRegistry::new(), Backend::memory())
    }

    /// Load whatever the backend holds and wrap it.
    pub async fn open(backend: Backend) -> Result<Self, FlowError> {
        let registry = backend.load().await?;
        Ok(Self::new(registry, backend))
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    /// Store a new flow under a fresh handle.
    pub async fn create(&self, flow: RegistrationFlow) -> Result<FlowHandle, FlowError> {
        let handle = FlowHandle::generate();
        let id = flow.id;

        let mut flows = self.flows.write().await;
        let mut next = flows.clone();
        next.insert(handle.clone(), flow);
        self.commit(&mut flows, next).await?;

        info!(flow_id = %id, "Registration flow created");
        Ok(handle)
    }

    /// A store bound to one handle.
    pub fn bind(&self, handle: FlowHandle) -> PersistedFlowStore {
        PersistedFlowStore {
            handle,
            repository: self.clone(),
        }
    }

    /// Remove flows whose TTL passed before `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, FlowError> {
        let mut flows = self.flows.write().await;
        let mut next = flows.clone();
        let removed = next.purge_expired(now);
        if removed > 0 {
            self.commit(&mut flows, next).await?;
        }
        Ok(removed)
    }

    /// Save `next` and only then make it the live registry, so a failed save
    /// leaves the previous state in place.
    async fn commit(
        &self,
        live: &mut FlowRegistry,
        next: FlowRegistry,
    ) -> Result<(), FlowError> {
        self.backend.save(&next).await?;
        *live = next;
        Ok(())
    }

    /// Number of flows still within their TTL.
    pub async fn count_active(&self) -> usize {
        self.flows.read().await.count_active(Utc::now())
    }
}

/// A persisted flow addressed by its handle.
#[derive(Clone)]
pub struct PersistedFlowStore {
    handle: FlowHandle,
    repository: FlowRepository,
}

impl PersistedFlowStore {
    pub fn handle(&self) -> &FlowHandle {
        &self.handle
    }
}

#[async_trait]
impl FlowStore for PersistedFlowStore {
    async fn load(&self) -> Result<Option<RegistrationFlow>, FlowError> {
        let flows = self.repository.flows.read().await;
        Ok(flows.get(&self.handle).cloned())
    }

    async fn write(&self, update: FlowUpdate) -> Result<RegistrationFlow, FlowError> {
        // Held across the save; the update lands on a copy that replaces the
        // live registry only once the backend accepted it.
        let mut flows = self.repository.flows.write().await;
        let mut next = flows.clone();
        let flow = next.get_mut(&self.handle).ok_or(FlowError::NotFound)?;

        let key = update.payload.key();
        flow.apply_update(update);
        let updated = flow.clone();

        self.repository.commit(&mut flows, next).await?;

        debug!(flow_id = %updated.id, step_key = ?key, current_step = %updated.current_step, "Flow updated");
        Ok(updated)
    }

    async fn destroy(&self) -> Result<Option<RegistrationFlow>, FlowError> {
        let mut flows = self.repository.flows.write().await;
        let mut next = flows.clone();
        let removed = next.remove(&self.handle);
        if removed.is_some() {
            self.repository.commit(&mut flows, next).await?;
        }
        Ok(removed)
    }
}
