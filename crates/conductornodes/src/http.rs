use async_trait::async_trait;
use conductorcore::{NodeContext, NodeError, NodeExecutable, NodeMetadata, PortDefinition};
use serde_json::json;

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutable for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<serde_json::Value, NodeError> {
        let url = ctx.require_str("url")?;
        let method_value = ctx.param_or("method", json!("GET"));
        let method = method_value.as_str().unwrap_or("GET").to_uppercase();

        tracing::debug!(node_id = %ctx.node_id, "{} {}", method, url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        if matches!(method.as_str(), "POST" | "PUT") {
            match ctx.params.get("body") {
                Some(serde_json::Value::String(text)) => request = request.body(text.clone()),
                Some(body) => request = request.json(body),
                None => {}
            }
        }

        // Add headers if provided
        if let Some(serde_json::Value::Object(headers)) = ctx.params.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        let response = tokio::select! {
            response = request.send() => response
                .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers_map: serde_json::Map<String, serde_json::Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or(""))))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        tracing::debug!(node_id = %ctx.node_id, "Response status: {}", status);

        Ok(json!({
            "status": status,
            "body": body_text,
            "headers": headers_map,
        }))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            inputs: vec![
                PortDefinition::required("url", "Request URL"),
                PortDefinition::optional("method", "GET, POST, PUT or DELETE"),
                PortDefinition::optional("body", "Body for POST and PUT"),
                PortDefinition::optional("headers", "Header name to value"),
            ],
            outputs: vec![
                PortDefinition::required("status", "HTTP status code"),
                PortDefinition::required("body", "Response text"),
                PortDefinition::required("headers", "Response headers"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductorcore::{NodeId, Params};

    #[tokio::test]
    async fn rejects_unknown_method_before_sending() {
        let mut params = Params::new();
        params.insert("url".into(), json!("http://127.0.0.1:9/"));
        params.insert("method".into(), json!("PATCH"));
        let result = HttpRequestNode::new()
            .execute(NodeContext::new(NodeId::from("h"), params))
            .await;
        assert!(matches!(result, Err(NodeError::Configuration(_))));
    }

    #[tokio::test]
    async fn requires_url() {
        let result = HttpRequestNode::new()
            .execute(NodeContext::new(NodeId::from("h"), Params::new()))
            .await;
        assert!(matches!(result, Err(NodeError::MissingInput(_))));
    }
}
