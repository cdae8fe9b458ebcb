//! Call lifecycle notifications
//!
//! Broadcast bus and event types published by the orchestrator and
//! consumed by the SSE endpoint and anything else that wants to observe calls.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
