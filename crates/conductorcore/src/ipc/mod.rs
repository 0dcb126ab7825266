//! Process-boundary plumbing: raw endpoints, the role-aware transport and
//! the rule-driven forwarder between the local event bus and the transport.

mod endpoint;
mod forwarder;
mod transport;

pub use endpoint::{IpcEndpoint, IpcMessage, StreamEndpoint};
pub use forwarder::{AutoForwarder, ForwardRules};
pub use transport::{ChannelHandler, IpcTransport, ListenerId, ProcessRole};
