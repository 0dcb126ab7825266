use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductorcore::{ConductorError, NodeDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A saved flow: a root definition plus bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDocument {
    #[serde(default = "generate_flow_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub definition: NodeDefinition,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn generate_flow_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl FlowDocument {
    pub fn new(name: impl Into<String>, definition: NodeDefinition) -> Self {
        Self {
            id: generate_flow_id(),
            name: name.into(),
            description: String::new(),
            definition,
            updated_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    /// Case-insensitive substring match on the flow name
    pub name_contains: Option<String>,
}

/// Persistence for flow documents. The format is up to the implementation.
#[async_trait]
pub trait FlowStorage: Send + Sync {
    /// Insert or replace; returns the stored document
    async fn save_flow(&self, flow: FlowDocument) -> Result<FlowDocument, ConductorError>;

    async fn load_flow(&self, id: &str) -> Result<Option<FlowDocument>, ConductorError>;

    async fn list_flows(&self, options: ListOptions) -> Result<Vec<FlowDocument>, ConductorError>;

    /// Returns whether anything was deleted
    async fn delete_flow(&self, id: &str) -> Result<bool, ConductorError>;
}

#[derive(Default)]
pub struct InMemoryFlowStorage {
    flows: RwLock<HashMap<String, FlowDocument>>,
}

impl InMemoryFlowStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStorage for InMemoryFlowStorage {
    async fn save_flow(&self, mut flow: FlowDocument) -> Result<FlowDocument, ConductorError> {
        if flow.id.trim().is_empty() {
            return Err(ConductorError::Storage("flow id must not be empty".into()));
        }
        flow.updated_at = Utc::now();
        tracing::debug!(flow_id = %flow.id, name = %flow.name, "Saving flow");
        self.flows.write().await.insert(flow.id.clone(), flow.clone());
        Ok(flow)
    }

    async fn load_flow(&self, id: &str) -> Result<Option<FlowDocument>, ConductorError> {
        Ok(self.flows.read().await.get(id).cloned())
    }

    async fn list_flows(&self, options: ListOptions) -> Result<Vec<FlowDocument>, ConductorError> {
        let needle = options.name_contains.map(|n| n.to_lowercase());
        let flows = self.flows.read().await;

        let mut matching: Vec<FlowDocument> = flows
            .values()
            .filter(|f| match &needle {
                Some(needle) => f.name.to_lowercase().contains(needle),
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        Ok(matching
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn delete_flow(&self, id: &str) -> Result<bool, ConductorError> {
        let removed = self.flows.write().await.remove(id).is_some();
        if removed {
            tracing::info!(flow_id = %id, "Deleted flow");
        }
        Ok(removed)
    }
}
