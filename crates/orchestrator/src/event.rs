//! Provider-agnostic event vocabulary.

use std::fmt;

use callbridge_core::{CallStatus, TranscriptEntry};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Why the telephony provider reports a call as over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Normal,
    NoAnswer,
    Busy,
    Cancelled,
    Error,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::NoAnswer => "no-answer",
            Self::Busy => "busy",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The telephony provider accepted the dial request.
    TelephonyAccepted { leg_id: Option<String> },
    CallRinging,
    CallAnswered,
    CallEnded {
        reason: EndReason,
        detail: Option<String>,
    },
    /// The voice-AI provider closed the conversation.
    VoiceSessionEnded { reason: Option<String> },
    TranscriptFragment(TranscriptEntry),
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TelephonyAccepted { .. } => "TelephonyAccepted",
            Self::CallRinging => "CallRinging",
            Self::CallAnswered => "CallAnswered",
            Self::CallEnded { .. } => "CallEnded",
            Self::VoiceSessionEnded { .. } => "VoiceSessionEnded",
            Self::TranscriptFragment(_) => "TranscriptFragment",
        }
    }

    /// The status this event nominally drives a call to. Transcript
    /// fragments carry no status.
    pub fn nominal_status(&self) -> Option<CallStatus> {
        match self {
            Self::TelephonyAccepted { .. } => Some(CallStatus::Initiating),
            Self::CallRinging => Some(CallStatus::Ringing),
            Self::CallAnswered => Some(CallStatus::InProgress),
            Self::CallEnded { reason, .. } => Some(match reason {
                EndReason::Normal => CallStatus::Completed,
                EndReason::NoAnswer => CallStatus::NoAnswer,
                EndReason::Busy => CallStatus::Busy,
                EndReason::Cancelled => CallStatus::Cancelled,
                EndReason::Error => CallStatus::Failed,
            }),
            Self::VoiceSessionEnded { .. } => Some(CallStatus::Failed),
            Self::TranscriptFragment(_) => None,
        }
    }
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallEnded { reason, .. } => write!(f, "CallEnded({})", reason.as_str()),
            other => f.write_str(other.name()),
        }
    }
}

/// Which side produced an event. Internal events come from the orchestrator
/// itself (orphan reaping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Telephony,
    VoiceAi,
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub kind: CallEvent,
    pub source: EventSource,
    /// Provider delivery sequence, when the provider numbers its callbacks.
    pub sequence: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

impl NormalizedEvent {
    pub fn new(kind: CallEvent, source: EventSource) -> Self {
        Self {
            kind,
            source,
            sequence: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn telephony(kind: CallEvent) -> Self {
        Self::new(kind, EventSource::Telephony)
    }

    pub fn voice(kind: CallEvent) -> Self {
        Self::new(kind, EventSource::VoiceAi)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// How a webhook identifies the call it is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRef {
    CallId(Uuid),
    TelephonyLeg(String),
    VoiceSession(String),
}

impl fmt::Display for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallId(id) => write!(f, "call {}", id),
            Self::TelephonyLeg(leg) => write!(f, "telephony leg {}", leg),
            Self::VoiceSession(session) => write!(f, "voice session {}", session),
        }
    }
}

/// A normalized event together with the reference to its call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderNotification {
    pub call: CallRef,
    pub event: NormalizedEvent,
}

/// Incoming call announced by the telephony provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCall {
    pub leg_id: String,
    pub caller: String,
    pub called: String,
}

/// What happened when an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { from: CallStatus, to: CallStatus },
    TranscriptAppended,
    /// The voice session ended after answer; only the timestamp is recorded.
    SessionEndRecorded,
    /// Redelivery, already-terminal call, or a sequence marker already seen.
    Duplicate,
    /// Older than the call's current position in the lifecycle.
    Stale,
    /// Structurally invalid for the call's state; dropped and logged.
    Anomaly(String),
    /// Payload carries nothing the engine acts on.
    Ignored,
}
