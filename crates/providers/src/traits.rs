use async_trait::async_trait;
use callbridge_core::{CallSummary, PromptConfig, Sentiment, TranscriptEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Parameters for placing an outbound call.
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub call_id: Uuid,
    pub to: String,
    /// Overrides the client's configured caller id.
    pub from: Option<String>,
    pub join_target: String,
}

/// A telephony leg accepted by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelephonyLeg {
    pub leg_id: String,
    pub from_number: Option<String>,
}

/// A voice-AI conversation ready for the telephony leg to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSession {
    pub session_id: String,
    pub join_target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

impl AnalysisResult {
    pub fn into_summary(self, generated_at: DateTime<Utc>) -> CallSummary {
        CallSummary {
            summary: self.summary,
            sentiment: self.sentiment,
            key_points: self.key_points,
            action_items: self.action_items,
            generated_at,
        }
    }
}

#[async_trait]
pub trait TelephonyClient: Send + Sync {
    async fn dial(&self, request: &DialRequest) -> Result<TelephonyLeg>;

    async fn hangup(&self, leg_id: &str) -> Result<()>;
}

#[async_trait]
pub trait VoiceAiClient: Send + Sync {
    async fn create_session(&self, call_id: Uuid, prompt: &PromptConfig) -> Result<VoiceSession>;

    async fn terminate_session(&self, session_id: &str) -> Result<()>;
}

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn summarize(&self, transcript: &[TranscriptEntry]) -> Result<AnalysisResult>;
}
