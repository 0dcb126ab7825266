use async_trait::async_trait;
use conductorcore::{NodeContext, NodeError, NodeExecutable, NodeMetadata, PortDefinition};
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;
const PROGRESS_TICKS: u64 = 10;

/// Delay execution for a specified duration, reporting progress as it goes
pub struct DelayNode;

#[async_trait]
impl NodeExecutable for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<serde_json::Value, NodeError> {
        let delay_ms = ctx
            .params
            .get("delay_ms")
            .and_then(|v| v.as_f64())
            .map(|ms| ms.max(0.0) as u64)
            .unwrap_or(DEFAULT_DELAY_MS);

        tracing::debug!(node_id = %ctx.node_id, "Delaying for {}ms", delay_ms);

        let tick = Duration::from_millis(delay_ms / PROGRESS_TICKS);
        for i in 1..=PROGRESS_TICKS {
            tokio::select! {
                _ = sleep(tick) => {}
                _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
            }
            // 100 is left to the executor
            if i < PROGRESS_TICKS {
                ctx.progress
                    .report((i * 100 / PROGRESS_TICKS) as f64, "Waiting");
            }
        }
        // Whatever the division dropped
        sleep(Duration::from_millis(delay_ms % PROGRESS_TICKS)).await;

        // Pass through any inputs
        Ok(serde_json::Value::Object(ctx.params))
    }

    fn reports_progress(&self) -> bool {
        true
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![PortDefinition::optional("delay_ms", "Milliseconds to wait (default 1000)")],
            outputs: vec![],
        }
    }
}
