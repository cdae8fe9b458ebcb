use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Agent,
    Caller,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Caller => "caller",
        }
    }

    /// Map a provider role label onto a speaker.
    ///
    /// Voice-AI providers label the model side as "agent" or "assistant" and
    /// the human side as "user"; anything unrecognised is the caller.
    pub fn from_role(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "agent" | "assistant" | "ai" | "bot" => Self::Agent,
            _ => Self::Caller,
        }
    }
}

/// One utterance in a call transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// Provider-supplied time of the utterance; the primary ordering key.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Position in arrival order, used to break timestamp ties.
    pub arrival_seq: u64,
}

impl TranscriptEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp,
            confidence: None,
            arrival_seq: 0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Natural-key equality: the same speaker said the same text at the same time.
    pub fn same_utterance(&self, other: &TranscriptEntry) -> bool {
        self.speaker == other.speaker && self.timestamp == other.timestamp && self.text == other.text
    }
}
