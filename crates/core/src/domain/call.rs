use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::summary::CallSummary;
use super::transcript::TranscriptEntry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Initiating,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Busy,
    Cancelled,
}

impl CallStatus {
    pub const ALL: [CallStatus; 9] = [
        Self::Pending,
        Self::Initiating,
        Self::Ringing,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::NoAnswer,
        Self::Busy,
        Self::Cancelled,
    ];

    pub const NON_TERMINAL: [CallStatus; 4] = [
        Self::Pending,
        Self::Initiating,
        Self::Ringing,
        Self::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Initiating => "initiating",
            Self::Ringing => "ringing",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NoAnswer => "no_answer",
            Self::Busy => "busy",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "initiating" => Some(Self::Initiating),
            "ringing" => Some(Self::Ringing),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "no_answer" => Some(Self::NoAnswer),
            "busy" => Some(Self::Busy),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::NoAnswer | Self::Busy | Self::Cancelled
        )
    }

    /// Position in the lifecycle graph. Every legal transition strictly
    /// increases the rank; all terminal states share the highest rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Initiating => 1,
            Self::Ringing => 2,
            Self::InProgress => 3,
            Self::Completed | Self::Failed | Self::NoAnswer | Self::Busy | Self::Cancelled => 4,
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    #[default]
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Instructions handed to the voice-AI session when the call is set up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, ToSchema)]
pub struct PromptConfig {
    pub system_prompt: String,
    /// Opening line spoken by the agent once the callee picks up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl PromptConfig {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            greeting: None,
            voice: None,
        }
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Call {
    pub id: Uuid,
    pub direction: CallDirection,
    pub status: CallStatus,
    /// The remote party: the dialled number for outbound calls, the caller for inbound.
    pub phone_number: String,
    /// Number presented by the telephony provider on our side of the call.
    pub from_number: Option<String>,
    pub telephony_leg_id: Option<String>,
    pub voice_session_id: Option<String>,
    pub join_target: Option<String>,
    pub prompt: PromptConfig,
    pub transcript: Vec<TranscriptEntry>,
    pub summary: Option<CallSummary>,
    pub analysis_error: Option<String>,
    pub analysis_dispatched_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    /// Highest telephony status-callback sequence number applied so far.
    pub last_telephony_sequence: Option<u64>,
    pub voice_session_ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Time of the last mutation; drives orphan detection.
    pub updated_at: DateTime<Utc>,
}

impl Call {
    pub fn new_outbound(phone_number: impl Into<String>, prompt: PromptConfig) -> Self {
        Self::new(CallDirection::Outbound, CallStatus::Pending, phone_number, prompt)
    }

    pub fn new_inbound(
        telephony_leg_id: impl Into<String>,
        caller: impl Into<String>,
        called: impl Into<String>,
        prompt: PromptConfig,
    ) -> Self {
        let mut call = Self::new(CallDirection::Inbound, CallStatus::Initiating, caller, prompt);
        call.telephony_leg_id = Some(telephony_leg_id.into());
        call.from_number = Some(called.into());
        call
    }

    fn new(
        direction: CallDirection,
        status: CallStatus,
        phone_number: impl Into<String>,
        prompt: PromptConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            direction,
            status,
            phone_number: phone_number.into(),
            from_number: None,
            telephony_leg_id: None,
            voice_session_id: None,
            join_target: None,
            prompt,
            transcript: Vec::new(),
            summary: None,
            analysis_error: None,
            analysis_dispatched_at: None,
            error_detail: None,
            metadata: serde_json::Value::Object(Default::default()),
            last_telephony_sequence: None,
            voice_session_ended_at: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the call was ever answered.
    pub fn was_answered(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(started), Some(ended)) => Some((ended - started).num_seconds().max(0)),
            _ => None,
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    pub fn answer(&mut self, at: DateTime<Utc>) {
        self.status = CallStatus::InProgress;
        if self.started_at.is_none() {
            self.started_at = Some(at);
        }
        self.touch(at);
    }

    pub fn end(&mut self, status: CallStatus, at: DateTime<Utc>, error_detail: Option<String>) {
        self.status = status;
        self.ended_at = Some(at);
        if error_detail.is_some() {
            self.error_detail = error_detail;
        }
        self.touch(at);
    }

    /// Attach the post-call summary. A call owns at most one summary; a second
    /// attachment is refused.
    pub fn attach_summary(&mut self, summary: CallSummary) -> bool {
        if self.summary.is_some() {
            return false;
        }
        self.summary = Some(summary);
        self.analysis_error = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sentiment;
    use chrono::Duration;

    fn summary(text: &str) -> CallSummary {
        CallSummary {
            summary: text.to_string(),
            sentiment: Sentiment::Neutral,
            key_points: vec![],
            action_items: vec![],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_outbound_call_creation() {
        let call = Call::new_outbound("+14155551234", PromptConfig::new("Be brief."));

        assert_eq!(call.direction, CallDirection::Outbound);
        assert_eq!(call.status, CallStatus::Pending);
        assert!(call.telephony_leg_id.is_none());
        assert!(call.transcript.is_empty());
        assert!(call.metadata.is_object());
    }

    #[test]
    fn test_inbound_call_creation() {
        let call = Call::new_inbound("CA123", "+14155551234", "+18005550000", PromptConfig::default());

        assert_eq!(call.direction, CallDirection::Inbound);
        assert_eq!(call.status, CallStatus::Initiating);
        assert_eq!(call.telephony_leg_id.as_deref(), Some("CA123"));
        assert_eq!(call.from_number.as_deref(), Some("+18005550000"));
    }

    #[test]
    fn test_call_lifecycle_timestamps() {
        let mut call = Call::new_outbound("+14155551234", PromptConfig::default());
        let answered = Utc::now();
        call.answer(answered);
        assert_eq!(call.status, CallStatus::InProgress);
        assert!(call.was_answered());

        call.end(CallStatus::Completed, answered + Duration::seconds(42), None);
        assert_eq!(call.duration_seconds(), Some(42));
        assert!(call.is_terminal());
        assert!(call.error_detail.is_none());
    }

    #[test]
    fn test_duration_absent_without_answer() {
        let mut call = Call::new_outbound("+14155551234", PromptConfig::default());
        call.end(CallStatus::NoAnswer, Utc::now(), None);
        assert_eq!(call.duration_seconds(), None);
    }

    #[test]
    fn test_summary_attaches_once() {
        let mut call = Call::new_outbound("+14155551234", PromptConfig::default());
        call.analysis_error = Some("previous attempt failed".to_string());

        assert!(call.attach_summary(summary("first")));
        assert!(!call.attach_summary(summary("second")));
        assert_eq!(call.summary.as_ref().unwrap().summary, "first");
        assert!(call.analysis_error.is_none());
    }

    #[test]
    fn test_status_rank_and_terminal() {
        for status in CallStatus::NON_TERMINAL {
            assert!(!status.is_terminal());
            assert!(status.rank() < CallStatus::Completed.rank());
        }
        assert!(CallStatus::Cancelled.is_terminal());
        assert!(CallStatus::Pending.rank() < CallStatus::Initiating.rank());
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in CallStatus::ALL {
            assert_eq!(CallStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::parse("queued"), None);
        assert_eq!(CallDirection::parse("inbound"), Some(CallDirection::Inbound));
    }
}
