use async_trait::async_trait;
use conductorcore::{NodeContext, NodeError, NodeExecutable, NodeMetadata, PortDefinition};
use serde_json::json;

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl NodeExecutable for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<serde_json::Value, NodeError> {
        let message = ctx
            .params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(node_id = %ctx.node_id, "DEBUG: {}", message);

        // Also log all inputs for visibility
        for (key, value) in &ctx.params {
            tracing::debug!(node_id = %ctx.node_id, "  {}: {}", key, value);
        }

        Ok(json!({ "message": message }))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::optional("message", "Text to log")],
            outputs: vec![PortDefinition::required("message", "The logged text")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductorcore::{NodeId, Params};

    #[tokio::test]
    async fn echoes_message() {
        let mut params = Params::new();
        params.insert("message".into(), json!("hi"));
        let out = DebugNode
            .execute(NodeContext::new(NodeId::from("d"), params))
            .await
            .unwrap();
        assert_eq!(out, json!({ "message": "hi" }));
    }

    #[tokio::test]
    async fn falls_back_without_message() {
        let out = DebugNode
            .execute(NodeContext::new(NodeId::from("d"), Params::new()))
            .await
            .unwrap();
        assert_eq!(out["message"], "(no message)");
    }
}
