use crate::{ConductorError, ExecutionId, ExecutionRequest, ExecutionResult, ProgressEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Namespace used when no domain is configured
pub const DEFAULT_DOMAIN: &str = "conductor";

/// The closed set of event names exchanged between processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Execute,
    Result,
    Error,
    Progress,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Execute,
        EventKind::Result,
        EventKind::Error,
        EventKind::Progress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Result => "result",
            Self::Error => "error",
            Self::Progress => "progress",
        }
    }

    /// Channel name in `<domain>:<event>` form
    pub fn channel(&self, domain: &str) -> String {
        format!("{}:{}", domain, self.as_str())
    }

    /// Inverse of [`EventKind::channel`]; `None` for foreign domains or names
    pub fn from_channel(domain: &str, channel: &str) -> Option<Self> {
        let (prefix, name) = channel.split_once(':')?;
        if prefix != domain {
            return None;
        }
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `result` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResultEvent {
    pub execution_id: ExecutionId,
    pub result: ExecutionResult,
}

/// Payload of an `error` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionErrorEvent {
    pub execution_id: ExecutionId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ExecutionErrorEvent {
    pub fn from_error(execution_id: ExecutionId, error: &ConductorError) -> Self {
        Self {
            execution_id,
            message: error.to_string(),
            code: Some(error.code().to_string()),
        }
    }
}

/// Events emitted and consumed around an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum ConductorEvent {
    Execute(ExecutionRequest),
    Result(ExecutionResultEvent),
    Error(ExecutionErrorEvent),
    Progress(ProgressEvent),
}

impl ConductorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Execute(_) => EventKind::Execute,
            Self::Result(_) => EventKind::Result,
            Self::Error(_) => EventKind::Error,
            Self::Progress(_) => EventKind::Progress,
        }
    }

    /// Execution the event belongs to
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            Self::Execute(req) => &req.id,
            Self::Result(ev) => &ev.execution_id,
            Self::Error(ev) => &ev.execution_id,
            Self::Progress(ev) => &ev.execution_id,
        }
    }

    /// Payload sent on the event's channel, without the variant tag
    pub fn to_payload(&self) -> Result<serde_json::Value, ConductorError> {
        let value = match self {
            Self::Execute(req) => serde_json::to_value(req)?,
            Self::Result(ev) => serde_json::to_value(ev)?,
            Self::Error(ev) => serde_json::to_value(ev)?,
            Self::Progress(ev) => serde_json::to_value(ev)?,
        };
        Ok(value)
    }

    pub fn from_payload(kind: EventKind, payload: serde_json::Value) -> Result<Self, ConductorError> {
        let event = match kind {
            EventKind::Execute => Self::Execute(serde_json::from_value(payload)?),
            EventKind::Result => Self::Result(serde_json::from_value(payload)?),
            EventKind::Error => Self::Error(serde_json::from_value(payload)?),
            EventKind::Progress => Self::Progress(serde_json::from_value(payload)?),
        };
        Ok(event)
    }
}

/// Process-local event bus
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConductorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.sender.subscribe()
    }

    /// Fire and forget; an event with no subscribers is dropped
    pub fn emit(&self, event: ConductorEvent) {
        tracing::trace!(kind = %event.kind(), execution_id = %event.execution_id(), "emit");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeDefinition, Params};

    #[test]
    fn channel_names_round_trip() {
        assert_eq!(EventKind::Execute.channel(DEFAULT_DOMAIN), "conductor:execute");
        assert_eq!(
            EventKind::from_channel("conductor", "conductor:progress"),
            Some(EventKind::Progress)
        );
        assert_eq!(EventKind::from_channel("other", "conductor:progress"), None);
        assert_eq!(EventKind::from_channel("conductor", "conductor:bogus"), None);
    }

    #[test]
    fn payload_carries_no_variant_tag() {
        let req = ExecutionRequest::new(NodeDefinition::new("n", "debug.log"), Params::new());
        let event = ConductorEvent::Execute(req.clone());
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["nodeId"], "n");

        let decoded = ConductorEvent::from_payload(EventKind::Execute, payload).unwrap();
        assert_eq!(decoded, ConductorEvent::Execute(req));
    }

    #[tokio::test]
    async fn bus_delivers_to_every_subscriber() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(ConductorEvent::Error(ExecutionErrorEvent {
            execution_id: ExecutionId::from("e1"),
            message: "nope".into(),
            code: None,
        }));
        assert_eq!(a.recv().await.unwrap().kind(), EventKind::Error);
        assert_eq!(b.recv().await.unwrap().kind(), EventKind::Error);
    }
}
