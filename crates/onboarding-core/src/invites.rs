//! Join-token resolution.

use crate::error::FlowError;
use crate::types::{JoinToken, JoinTokenKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Where a join token points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteBinding {
    pub school_id: String,
    #[serde(default)]
    pub class_id: Option<String>,
}

/// Resolves a join token into a school/class binding.
#[async_trait]
pub trait InviteTokenResolver: Send + Sync {
    /// `Ok(None)` when the token is unknown.
    async fn resolve(&self, token: &JoinToken) -> Result<Option<InviteBinding>, FlowError>;
}

/// Fixed token table, typically loaded from a JSON file:
///
/// ```json
/// {
///   "classes": { "k7Qx": { "school_id": "north-high", "class_id": "bio-101" } },
///   "schools": { "nh2024": { "school_id": "north-high" } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticInviteResolver {
    #[serde(default)]
    classes: HashMap<String, InviteBinding>,
    #[serde(default)]
    schools: HashMap<String, InviteBinding>,
}

impl StaticInviteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(
        mut self,
        token: impl Into<String>,
        school_id: impl Into<String>,
        class_id: impl Into<String>,
    ) -> Self {
        self.classes.insert(
            token.into(),
            InviteBinding {
                school_id: school_id.into(),
                class_id: Some(class_id.into()),
            },
        );
        self
    }

    pub fn with_school(mut self, token: impl Into<String>, school_id: impl Into<String>) -> Self {
        self.schools.insert(
            token.into(),
            InviteBinding {
                school_id: school_id.into(),
                class_id: None,
            },
        );
        self
    }

    pub async fn from_file(path: &Path) -> Result<Self, FlowError> {
        let data = tokio::fs::read(path).await?;
        let resolver: Self = serde_json::from_slice(&data)?;
        info!(
            classes = resolver.classes.len(),
            schools = resolver.schools.len(),
            "Loaded invite tokens from {:?}",
            path
        );
        Ok(resolver)
    }
}

#[async_trait]
impl InviteTokenResolver for StaticInviteResolver {
    async fn resolve(&self, token: &JoinToken) -> Result<Option<InviteBinding>, FlowError> {
        let table = match token.kind {
            JoinTokenKind::Class => &self.classes,
            JoinTokenKind::School => &self.schools,
        };
        let binding = table.get(&token.value).cloned();
        debug!(kind = ?token.kind, resolved = binding.is_some(), "Join token lookup");
        Ok(binding)
    }
}
