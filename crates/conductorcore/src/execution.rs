use crate::{ConductorError, ExecutionId, NodeDefinition, NodeId, Params};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default budget for a cross-process execution
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 30_000;

/// Request to execute a node (or group) in another process.
///
/// `inputs` has no serde default: a wire request without it fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    #[serde(default = "empty_execution_id")]
    pub id: ExecutionId,
    #[serde(default = "empty_node_id")]
    pub node_id: NodeId,
    pub definition: NodeDefinition,
    pub inputs: Params,
    #[serde(default)]
    pub options: ExecutionOptions,
}

fn empty_execution_id() -> ExecutionId {
    ExecutionId::new("")
}

fn empty_node_id() -> NodeId {
    NodeId::new("")
}

impl ExecutionRequest {
    /// Build a request with a freshly generated id
    pub fn new(definition: NodeDefinition, inputs: Params) -> Self {
        Self {
            id: ExecutionId::generate(),
            node_id: definition.id.clone(),
            definition,
            inputs,
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.options.timeout = Some(timeout_ms);
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.options.timeout.unwrap_or(DEFAULT_EXECUTION_TIMEOUT_MS)
    }

    /// Reject malformed requests before anything is sent
    pub fn validate(&self) -> Result<(), ConductorError> {
        if self.id.is_empty() {
            return Err(ConductorError::Validation(
                "execution request is missing an id".to_string(),
            ));
        }
        if self.node_id.is_empty() {
            return Err(ConductorError::Validation(format!(
                "execution request {} is missing a nodeId",
                self.id
            )));
        }
        if self.definition.node_type.is_empty() {
            return Err(ConductorError::Validation(format!(
                "definition for node {} has no type",
                self.node_id
            )));
        }
        if self.options.timeout == Some(0) {
            return Err(ConductorError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Terminal outcome of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionErrorInfo>,
    /// Milliseconds
    pub duration: u64,
    pub executed_nodes: Vec<NodeId>,
}

impl ExecutionResult {
    pub fn succeeded(data: serde_json::Value, duration: u64, executed_nodes: Vec<NodeId>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration,
            executed_nodes,
        }
    }

    pub fn failed(error: ExecutionErrorInfo, duration: u64, executed_nodes: Vec<NodeId>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            duration,
            executed_nodes,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionErrorInfo {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionErrorInfo {
    pub fn new(node_id: NodeId, message: impl Into<String>) -> Self {
        Self {
            node_id,
            code: None,
            message: message.into(),
            stack: None,
            timestamp: Utc::now(),
        }
    }

    pub fn from_error(node_id: NodeId, error: &ConductorError) -> Self {
        Self {
            code: Some(error.code().to_string()),
            ..Self::new(node_id, error.to_string())
        }
    }

    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        self.stack = stack;
        self
    }
}

/// Bookkeeping recorded by the group executor for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub executed_at: DateTime<Utc>,
    pub node_id: NodeId,
    pub node_type: String,
    pub child_nodes_executed: usize,
    /// Milliseconds
    pub total_execution_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub result: ExecutionResult,
    pub metadata: GroupMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape_is_camel_case() {
        let def = NodeDefinition::new("n1", "debug.log");
        let req = ExecutionRequest::new(def, Params::new()).with_timeout(500);
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["nodeId"], json!("n1"));
        assert_eq!(wire["options"]["timeout"], json!(500));
        assert_eq!(wire["definition"]["type"], json!("debug.log"));
    }

    #[test]
    fn validation_rejects_missing_ids() {
        let def = NodeDefinition::new("n1", "debug.log");
        let mut req = ExecutionRequest::new(def, Params::new());
        assert!(req.validate().is_ok());

        req.node_id = NodeId::new("");
        assert!(matches!(req.validate(), Err(ConductorError::Validation(_))));

        req.node_id = NodeId::new("n1");
        req.id = ExecutionId::new("");
        assert!(matches!(req.validate(), Err(ConductorError::Validation(_))));
    }

    #[test]
    fn wire_request_without_inputs_does_not_decode() {
        let raw = json!({
            "id": "exec-1",
            "nodeId": "n1",
            "definition": { "id": "n1", "type": "debug.log" }
        });
        assert!(serde_json::from_value::<ExecutionRequest>(raw).is_err());
    }

    #[test]
    fn wire_request_without_id_decodes_but_fails_validation() {
        let raw = json!({
            "nodeId": "n1",
            "definition": { "id": "n1", "type": "debug.log" },
            "inputs": {}
        });
        let req: ExecutionRequest = serde_json::from_value(raw).unwrap();
        assert!(req.validate().is_err());
    }
}
