//! Event types for call lifecycle notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Everything observable about a call's life
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A call record was created (outbound request or inbound webhook)
    #[serde(rename = "call.created")]
    CallCreated {
        call_id: Uuid,
        direction: String,
        phone_number: String,
    },

    #[serde(rename = "call.status_changed")]
    CallStatusChanged {
        call_id: Uuid,
        from_status: String,
        to_status: String,
    },

    #[serde(rename = "call.transcript_appended")]
    TranscriptAppended {
        call_id: Uuid,
        speaker: String,
        text: String,
    },

    #[serde(rename = "call.summary_attached")]
    SummaryAttached { call_id: Uuid, sentiment: String },

    #[serde(rename = "call.analysis_failed")]
    AnalysisFailed { call_id: Uuid, error: String },

    /// A provider event contradicted the recorded lifecycle and was not applied
    #[serde(rename = "call.anomaly")]
    CallAnomaly { call_id: Uuid, reason: String },

    /// A stuck call was forced to a terminal state by the reaper
    #[serde(rename = "call.reaped")]
    OrphanReaped { call_id: Uuid, from_status: String },

    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Get the call ID associated with this event, if any
    pub fn call_id(&self) -> Option<Uuid> {
        match self {
            Event::CallCreated { call_id, .. }
            | Event::CallStatusChanged { call_id, .. }
            | Event::TranscriptAppended { call_id, .. }
            | Event::SummaryAttached { call_id, .. }
            | Event::AnalysisFailed { call_id, .. }
            | Event::CallAnomaly { call_id, .. }
            | Event::OrphanReaped { call_id, .. } => Some(*call_id),
            Event::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let envelope = EventEnvelope::new(Event::CallCreated {
            call_id: Uuid::new_v4(),
            direction: "outbound".to_string(),
            phone_number: "+14155551234".to_string(),
        });

        assert!(!envelope.id.is_nil());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::CallStatusChanged {
            call_id: Uuid::new_v4(),
            from_status: "ringing".to_string(),
            to_status: "in_progress".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("call.status_changed"));
        assert!(json.contains("from_status"));
        assert!(json.contains("in_progress"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"call.anomaly","call_id":"550e8400-e29b-41d4-a716-446655440000","reason":"busy after answer"}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::CallAnomaly { call_id, reason } => {
                assert_eq!(reason, "busy after answer");
                assert!(!call_id.is_nil());
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_call_id() {
        let call_id = Uuid::new_v4();
        let event = Event::OrphanReaped {
            call_id,
            from_status: "ringing".to_string(),
        };
        assert_eq!(event.call_id(), Some(call_id));

        let error_event = Event::Error {
            message: "boom".to_string(),
            context: None,
        };
        assert_eq!(error_event.call_id(), None);
    }
}
