use super::endpoint::{IpcEndpoint, IpcMessage};
use crate::ConductorError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Which side of the process boundary we are on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    /// Owns the workers; broadcasts to every connected endpoint
    Main,
    /// Talks to exactly one main process
    Renderer,
    /// No bridge present; sends fail and nothing is ever received
    Unavailable,
}

impl ProcessRole {
    pub const ENV_VAR: &'static str = "CONDUCTOR_PROCESS_ROLE";

    /// Read the role from `CONDUCTOR_PROCESS_ROLE`
    pub fn detect() -> Self {
        match std::env::var(Self::ENV_VAR) {
            Ok(value) => Self::parse(&value),
            Err(_) => Self::Unavailable,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "main" => Self::Main,
            "renderer" => Self::Renderer,
            _ => Self::Unavailable,
        }
    }
}

pub type ChannelHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Handle for one registered channel handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ChannelListeners {
    handlers: Vec<(ListenerId, ChannelHandler)>,
    /// One native subscription per channel, shared by all handlers
    native: JoinHandle<()>,
}

type ListenerMap = Arc<Mutex<HashMap<String, ChannelListeners>>>;

const INBOUND_CAPACITY: usize = 1024;

/// Channel-based message passing to the other process(es)
pub struct IpcTransport {
    role: ProcessRole,
    endpoints: RwLock<Vec<Arc<dyn IpcEndpoint>>>,
    inbound: broadcast::Sender<IpcMessage>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    listeners: ListenerMap,
    next_listener: AtomicU64,
}

impl IpcTransport {
    pub fn new(role: ProcessRole) -> Self {
        if role == ProcessRole::Unavailable {
            tracing::warn!("IPC bridge unavailable; cross-process calls will time out");
        }
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            role,
            endpoints: RwLock::new(Vec::new()),
            inbound,
            pumps: Mutex::new(Vec::new()),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Transport whose role comes from the environment
    pub fn detect() -> Self {
        Self::new(ProcessRole::detect())
    }

    pub fn unavailable() -> Self {
        Self::new(ProcessRole::Unavailable)
    }

    pub fn main() -> Self {
        Self::new(ProcessRole::Main)
    }

    /// Renderer side already connected to its main process
    pub fn renderer(endpoint: Arc<dyn IpcEndpoint>) -> Result<Self, ConductorError> {
        let transport = Self::new(ProcessRole::Renderer);
        transport.connect(endpoint)?;
        Ok(transport)
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn is_available(&self) -> bool {
        self.role != ProcessRole::Unavailable
    }

    /// Attach a remote endpoint and start pumping its inbound messages
    pub fn connect(&self, endpoint: Arc<dyn IpcEndpoint>) -> Result<(), ConductorError> {
        let mut endpoints = self.endpoints.write();
        match self.role {
            ProcessRole::Unavailable => return Err(ConductorError::TransportUnavailable),
            ProcessRole::Renderer if !endpoints.is_empty() => {
                return Err(ConductorError::Validation(
                    "a renderer connects to exactly one main process".to_string(),
                ))
            }
            _ => {}
        }

        let mut remote = endpoint.subscribe();
        let inbound = self.inbound.clone();
        let pump = tokio::spawn(async move {
            loop {
                match remote.recv().await {
                    Ok(message) => {
                        let _ = inbound.send(message);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("IPC pump lagged, {} messages dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.pumps.lock().push(pump);
        endpoints.push(endpoint);
        tracing::info!(role = ?self.role, endpoints = endpoints.len(), "IPC endpoint connected");
        Ok(())
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Send to the remote side. Renderers send to their single peer, main
    /// fans out to every endpoint. Returns how many endpoints accepted it.
    pub fn send(&self, channel: &str, data: serde_json::Value) -> Result<usize, ConductorError> {
        let endpoints = self.endpoints.read();
        match self.role {
            ProcessRole::Unavailable => Err(ConductorError::TransportUnavailable),
            ProcessRole::Renderer => {
                let endpoint = endpoints.first().ok_or(ConductorError::TransportUnavailable)?;
                endpoint.send(IpcMessage::new(channel, data))?;
                Ok(1)
            }
            ProcessRole::Main => {
                let mut delivered = 0;
                for endpoint in endpoints.iter() {
                    match endpoint.send(IpcMessage::new(channel, data.clone())) {
                        Ok(()) => delivered += 1,
                        Err(e) => tracing::warn!(channel, "Broadcast to endpoint failed: {}", e),
                    }
                }
                Ok(delivered)
            }
        }
    }

    /// Register a handler for inbound messages on `channel`
    pub fn on(
        &self,
        channel: &str,
        handler: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        let handler: ChannelHandler = Arc::new(handler);

        let mut listeners = self.listeners.lock();
        match listeners.get_mut(channel) {
            Some(entry) => entry.handlers.push((id, handler)),
            None => {
                let native = self.spawn_native_listener(channel.to_string());
                listeners.insert(
                    channel.to_string(),
                    ChannelListeners {
                        handlers: vec![(id, handler)],
                        native,
                    },
                );
                tracing::debug!(channel, "Native IPC listener attached");
            }
        }
        id
    }

    /// Remove a handler. The native listener goes with the last handler.
    pub fn off(&self, channel: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entry) = listeners.get_mut(channel) else {
            return false;
        };

        let before = entry.handlers.len();
        entry.handlers.retain(|(hid, _)| *hid != id);
        let removed = entry.handlers.len() != before;

        if entry.handlers.is_empty() {
            if let Some(entry) = listeners.remove(channel) {
                entry.native.abort();
                tracing::debug!(channel, "Native IPC listener detached");
            }
        }
        removed
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .lock()
            .get(channel)
            .map(|e| e.handlers.len())
            .unwrap_or(0)
    }

    pub fn native_listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn spawn_native_listener(&self, channel: String) -> JoinHandle<()> {
        let mut inbound = self.inbound.subscribe();
        let listeners = self.listeners.clone();
        tokio::spawn(async move {
            loop {
                let message = match inbound.recv().await {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(%channel, "IPC listener lagged, {} messages dropped", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if message.channel != channel {
                    continue;
                }

                // Snapshot handlers so none run under the lock
                let handlers: Vec<ChannelHandler> = listeners
                    .lock()
                    .get(&channel)
                    .map(|e| e.handlers.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default();

                for handler in handlers {
                    handler(message.payload.clone());
                }
            }
        })
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        for (_, entry) in self.listeners.lock().drain() {
            entry.native.abort();
        }
    }
}
