use std::time::Duration;

use callbridge_core::PromptConfig;
use providers::RetryPolicy;

/// Tunables for the orchestration engine.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// A call in Pending, Initiating or Ringing with no activity for this
    /// long is force-failed.
    pub orphan_timeout: Duration,
    /// Same bound for calls in progress.
    pub max_call_duration: Duration,
    pub reap_interval: Duration,
    /// How long after a call ends late transcript fragments are still accepted.
    pub transcript_retention: Duration,
    /// Delay between completion and summarization, for trailing fragments.
    pub analysis_grace: Duration,
    pub inbound_persist_timeout: Duration,
    pub active_cache_capacity: usize,
    pub provider_retry: RetryPolicy,
    pub analysis_retry: RetryPolicy,
    /// Prompt handed to the voice-AI session for inbound calls.
    pub inbound_prompt: PromptConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            orphan_timeout: Duration::from_secs(120),
            max_call_duration: Duration::from_secs(4 * 60 * 60),
            reap_interval: Duration::from_secs(30),
            transcript_retention: Duration::from_secs(600),
            analysis_grace: Duration::from_secs(2),
            inbound_persist_timeout: Duration::from_millis(500),
            active_cache_capacity: 10_000,
            provider_retry: RetryPolicy::default(),
            analysis_retry: RetryPolicy::default(),
            inbound_prompt: PromptConfig::new(
                "You are a friendly phone assistant. Help the caller with their request.",
            )
            .with_greeting("Hello! How can I help you today?"),
        }
    }
}
