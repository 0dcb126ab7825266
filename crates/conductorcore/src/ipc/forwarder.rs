use super::transport::{IpcTransport, ListenerId};
use crate::{ConductorError, ConductorEvent, EventBus, EventKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Which local events cross the boundary, in which direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRules {
    /// Local events relayed to the remote process
    pub to_remote: Vec<EventKind>,
    /// Remote events re-emitted on the local bus
    pub from_remote: Vec<EventKind>,
}

impl ForwardRules {
    /// Side that requests executions
    pub fn requester() -> Self {
        Self {
            to_remote: vec![EventKind::Execute],
            from_remote: vec![EventKind::Result, EventKind::Error, EventKind::Progress],
        }
    }

    /// Side that runs executions
    pub fn worker() -> Self {
        let requester = Self::requester();
        Self {
            to_remote: requester.from_remote,
            from_remote: requester.to_remote,
        }
    }

    /// A kind in both lists would bounce between the processes forever
    pub fn validate(&self) -> Result<(), ConductorError> {
        if let Some(kind) = self.to_remote.iter().find(|k| self.from_remote.contains(k)) {
            return Err(ConductorError::Validation(format!(
                "event '{}' cannot be forwarded in both directions",
                kind
            )));
        }
        Ok(())
    }
}

enum ForwarderState {
    Stopped,
    Active(ActiveForwarding),
}

struct ActiveForwarding {
    outbound: Option<JoinHandle<()>>,
    inbound: Vec<(String, ListenerId)>,
}

struct Inner {
    rules: ForwardRules,
    state: ForwarderState,
}

/// Relays local bus events across the IPC transport according to rules
pub struct AutoForwarder {
    domain: String,
    bus: EventBus,
    transport: Arc<IpcTransport>,
    inner: Mutex<Inner>,
}

impl AutoForwarder {
    pub fn new(
        domain: impl Into<String>,
        bus: EventBus,
        transport: Arc<IpcTransport>,
        rules: ForwardRules,
    ) -> Result<Self, ConductorError> {
        rules.validate()?;
        Ok(Self {
            domain: domain.into(),
            bus,
            transport,
            inner: Mutex::new(Inner {
                rules,
                state: ForwarderState::Stopped,
            }),
        })
    }

    /// Start relaying. No-op when already active.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        self.start_locked(&mut inner);
    }

    /// Stop relaying. No-op when already stopped.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        self.stop_locked(&mut inner);
    }

    pub fn is_active(&self) -> bool {
        matches!(self.inner.lock().state, ForwarderState::Active(_))
    }

    pub fn rules(&self) -> ForwardRules {
        self.inner.lock().rules.clone()
    }

    /// Swap the rules. An active forwarder is stopped and restarted under
    /// one lock, so no caller ever sees a half-applied rule set.
    pub fn reconfigure(&self, rules: ForwardRules) -> Result<(), ConductorError> {
        rules.validate()?;
        let mut inner = self.inner.lock();
        let was_active = matches!(inner.state, ForwarderState::Active(_));
        self.stop_locked(&mut inner);
        inner.rules = rules;
        if was_active {
            self.start_locked(&mut inner);
        }
        Ok(())
    }

    fn start_locked(&self, inner: &mut Inner) {
        if matches!(inner.state, ForwarderState::Active(_)) {
            return;
        }
        if !self.transport.is_available() {
            tracing::warn!("IPC transport unavailable; event forwarding disabled");
            return;
        }

        let outbound = if inner.rules.to_remote.is_empty() {
            None
        } else {
            Some(self.spawn_outbound(inner.rules.to_remote.clone()))
        };

        let mut inbound = Vec::with_capacity(inner.rules.from_remote.len());
        for kind in &inner.rules.from_remote {
            let kind = *kind;
            let channel = kind.channel(&self.domain);
            let bus = self.bus.clone();
            let id = self.transport.on(&channel, move |payload| {
                match ConductorEvent::from_payload(kind, payload) {
                    Ok(event) => bus.emit(event),
                    Err(e) => tracing::warn!(%kind, "Dropping undecodable remote event: {}", e),
                }
            });
            inbound.push((channel, id));
        }

        tracing::info!(
            domain = %self.domain,
            to_remote = ?inner.rules.to_remote,
            from_remote = ?inner.rules.from_remote,
            "Auto-forwarding started"
        );
        inner.state = ForwarderState::Active(ActiveForwarding { outbound, inbound });
    }

    fn stop_locked(&self, inner: &mut Inner) {
        let state = std::mem::replace(&mut inner.state, ForwarderState::Stopped);
        let ForwarderState::Active(active) = state else {
            return;
        };
        if let Some(task) = active.outbound {
            task.abort();
        }
        for (channel, id) in active.inbound {
            self.transport.off(&channel, id);
        }
        tracing::info!(domain = %self.domain, "Auto-forwarding stopped");
    }

    fn spawn_outbound(&self, kinds: Vec<EventKind>) -> JoinHandle<()> {
        let mut events = self.bus.subscribe();
        let transport = self.transport.clone();
        let domain = self.domain.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Forwarder lagged, {} events dropped", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let kind = event.kind();
                if !kinds.contains(&kind) {
                    continue;
                }
                let payload = match event.to_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(%kind, "Failed to encode event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = transport.send(&kind.channel(&domain), payload) {
                    tracing::warn!(%kind, "Failed to forward event: {}", e);
                }
            }
        })
    }
}

impl Drop for AutoForwarder {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        self.stop_locked(&mut inner);
    }
}
