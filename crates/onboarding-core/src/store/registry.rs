//! In-memory flow registry, the unit that gets persisted.

use super::FlowHandle;
use crate::flow::RegistrationFlow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema version of the persisted registry.
const DATA_VERSION: u32 = 1;

/// Persisted flows indexed by handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRegistry {
    version: u32,
    flows: HashMap<FlowHandle, RegistrationFlow>,
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self {
            version: DATA_VERSION,
            flows: HashMap::new(),
        }
    }

    pub fn get(&self, handle: &FlowHandle) -> Option<&RegistrationFlow> {
        self.flows.get(handle)
    }

    pub fn get_mut(&mut self, handle: &FlowHandle) -> Option<&mut RegistrationFlow> {
        self.flows.get_mut(handle)
    }

    pub fn insert(&mut self, handle: FlowHandle, flow: RegistrationFlow) {
        self.flows.insert(handle, flow);
    }

    pub fn remove(&mut self, handle: &FlowHandle) -> Option<RegistrationFlow> {
        self.flows.remove(handle)
    }

    /// Drop every flow that expired before `now`. Returns how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.flows.len();
        self.flows.retain(|_, flow| !flow.is_expired_at(now));
        before - self.flows.len()
    }

    /// Number of stored flows, expired ones included.
    pub fn count(&self) -> usize {
        self.flows.len()
    }

    /// Number of flows still within their TTL.
    pub fn count_active(&self, now: DateTime<Utc>) -> usize {
        self.flows
            .values()
            .filter(|flow| !flow.is_expired_at(now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegistrationKind;
    use chrono::Duration;

    fn flow(ttl_minutes: i64) -> RegistrationFlow {
        RegistrationFlow::new(
            RegistrationKind::Student,
            None,
            Duration::minutes(ttl_minutes),
        )
    }

    #[test]
    fn test_registry_insert_and_get() {
        let mut registry = FlowRegistry::new();
        let handle = FlowHandle::generate();
        let flow = flow(30);
        let id = flow.id;

        registry.insert(handle.clone(), flow);

        assert_eq!(registry.get(&handle).unwrap().id, id);
        assert!(registry.get(&FlowHandle::generate()).is_none());
    }

    #[test]
    fn test_registry_remove() {
        let mut registry = FlowRegistry::new();
        let handle = FlowHandle::generate();
        registry.insert(handle.clone(), flow(30));

        assert!(registry.remove(&handle).is_some());
        assert!(registry.remove(&handle).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let mut registry = FlowRegistry::new();
        registry.insert(FlowHandle::generate(), flow(30));
        registry.insert(FlowHandle::generate(), flow(0));
        registry.insert(FlowHandle::generate(), flow(-5));

        let now = Utc::now();
        assert_eq!(registry.count_active(now), 1);
        assert_eq!(registry.purge_expired(now), 2);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_registry_serialization() {
        let mut registry = FlowRegistry::new();
        let handle = FlowHandle::generate();
        registry.insert(handle.clone(), flow(30));

        let json = serde_json::to_string(&registry).unwrap();
        let restored: FlowRegistry = serde_json::from_str(&json).unwrap();

        assert!(restored.get(&handle).is_some());
    }
}
