//! Instances (spec §3): the live state of one run of a definition, plus
//! the storage port instances are externalised through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub type InstanceId = String;

/// One recorded transition, in commit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub from_state: String,
    pub event: String,
    pub to_state: String,
}

/// A live or persisted run of a [`crate::Definition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub definition_name: String,
    pub current_state: String,
    pub context: serde_json::Value,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    #[must_use]
    pub fn new(id: impl Into<String>, definition_name: impl Into<String>, initial_state: impl Into<String>, context: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            definition_name: definition_name.into(),
            current_state: initial_state.into(),
            context,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filters accepted by [`InstanceStore::list_instances`] and
/// `StateMachineEngine::list_instances`.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub definition_name: Option<String>,
    pub state: Option<String>,
}

impl InstanceFilter {
    #[must_use]
    pub fn matches(&self, instance: &Instance) -> bool {
        self.definition_name.as_deref().is_none_or(|name| name == instance.definition_name)
            && self.state.as_deref().is_none_or(|state| state == instance.current_state)
    }
}

/// Persistence port instances are externalised through: definitions stay
/// in-process, instances round-trip to whatever durable store backs a
/// deployment.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// # Errors
    /// Propagates the backing store's failure.
    async fn save_instance(&self, instance: &Instance) -> anyhow::Result<()>;

    /// # Errors
    /// Propagates the backing store's failure.
    async fn load_instance(&self, id: &str) -> anyhow::Result<Option<Instance>>;

    /// # Errors
    /// Propagates the backing store's failure.
    async fn list_instances(&self, filter: &InstanceFilter) -> anyhow::Result<Vec<Instance>>;
}

/// In-memory `InstanceStore`, useful standalone and as the durability
/// floor beneath the engine's LRU cache.
#[derive(Default)]
pub struct InMemoryInstanceStore {
    instances: DashMap<InstanceId, Instance>,
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn save_instance(&self, instance: &Instance) -> anyhow::Result<()> {
        self.instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn load_instance(&self, id: &str) -> anyhow::Result<Option<Instance>> {
        Ok(self.instances.get(id).map(|e| e.clone()))
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> anyhow::Result<Vec<Instance>> {
        Ok(self.instances.iter().map(|e| e.clone()).filter(|i| filter.matches(i)).collect())
    }
}
