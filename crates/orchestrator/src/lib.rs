pub mod active_index;
mod analysis;
pub mod config;
pub mod error;
pub mod event;
pub mod locks;
pub mod normalizer;
pub mod orchestrator;
pub mod reaper;
pub mod resources;
pub mod state_machine;
pub mod transcript;

pub use active_index::ActiveCallIndex;
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use event::{
    ApplyOutcome, CallEvent, CallRef, EndReason, EventSource, InboundCall, NormalizedEvent,
    ProviderNotification,
};
pub use locks::{CallLockGuard, CallLocks};
pub use normalizer::{EventNormalizer, Normalized, Provider, RawPayload};
pub use orchestrator::{CallOrchestrator, InboundAnswer};
pub use reaper::ReapReport;
pub use state_machine::{CallStateMachine, Transition};
