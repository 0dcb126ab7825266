use async_trait::async_trait;
use conductorcore::{NodeContext, NodeError, NodeExecutable, NodeMetadata, PortDefinition};
use serde_json::json;

/// Parse a JSON string into a value
pub struct JsonParseNode;

#[async_trait]
impl NodeExecutable for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<serde_json::Value, NodeError> {
        let input = ctx.require_str("json")?;

        let parsed: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(json!({ "parsed": parsed }))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("json", "JSON text")],
            outputs: vec![PortDefinition::required("parsed", "Parsed value")],
        }
    }
}

/// Serialize a value to a JSON string
pub struct JsonStringifyNode;

#[async_trait]
impl NodeExecutable for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<serde_json::Value, NodeError> {
        let value = ctx.require_param("value")?;
        let pretty = ctx.param_or("pretty", json!(true)).as_bool().unwrap_or(true);

        let json_str = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(json!({ "json": json_str }))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![
                PortDefinition::required("value", "Value to serialize"),
                PortDefinition::optional("pretty", "Indent the output (default true)"),
            ],
            outputs: vec![PortDefinition::required("json", "JSON text")],
        }
    }
}
