// crates/conductorcore/src/events/mod.rs

mod base;
mod progress;

pub use base::{
    ConductorEvent, EventBus, EventKind, ExecutionErrorEvent, ExecutionResultEvent, DEFAULT_DOMAIN,
};
pub use progress::{ProgressEvent, ProgressGraph, ProgressNode};
