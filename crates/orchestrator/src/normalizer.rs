//! Translation of raw provider webhooks into [`NormalizedEvent`]s.

use std::collections::HashMap;
use std::str::FromStr;

use callbridge_core::{Speaker, TranscriptEntry};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::event::{
    CallEvent, CallRef, EndReason, EventSource, InboundCall, NormalizedEvent, ProviderNotification,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Twilio,
    Ultravox,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twilio => "twilio",
            Self::Ultravox => "ultravox",
        }
    }
}

impl FromStr for Provider {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twilio" => Ok(Self::Twilio),
            "ultravox" => Ok(Self::Ultravox),
            other => Err(OrchestratorError::normalize(other, "unknown provider")),
        }
    }
}

/// A webhook body as the request layer received it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Form(HashMap<String, String>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Event(ProviderNotification),
    /// Well-formed but carries nothing the engine acts on.
    Ignored(String),
}

pub struct EventNormalizer;

impl EventNormalizer {
    pub fn normalize(provider: Provider, raw: &RawPayload) -> Result<Normalized> {
        match (provider, raw) {
            (Provider::Twilio, RawPayload::Form(form)) => twilio_status(form),
            (Provider::Ultravox, RawPayload::Json(value)) => ultravox_event(value),
            (provider, _) => Err(OrchestratorError::normalize(
                provider.as_str(),
                "unexpected payload encoding",
            )),
        }
    }

    /// Extract the new-call announcement from an inbound voice webhook.
    pub fn normalize_inbound(provider: Provider, raw: &RawPayload) -> Result<InboundCall> {
        let RawPayload::Form(form) = raw else {
            return Err(OrchestratorError::normalize(
                provider.as_str(),
                "inbound call webhooks are form encoded",
            ));
        };
        if provider != Provider::Twilio {
            return Err(OrchestratorError::normalize(
                provider.as_str(),
                "provider does not announce inbound calls",
            ));
        }

        Ok(InboundCall {
            leg_id: required(form, "CallSid")?.to_string(),
            caller: required(form, "From")?.to_string(),
            called: form.get("To").cloned().unwrap_or_default(),
        })
    }
}

fn required<'a>(form: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    form.get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OrchestratorError::normalize("twilio", format!("missing {}", key)))
}

fn twilio_status(form: &HashMap<String, String>) -> Result<Normalized> {
    let leg_id = required(form, "CallSid")?;
    let status = required(form, "CallStatus")?;

    let kind = match status {
        "queued" | "initiated" => CallEvent::TelephonyAccepted {
            leg_id: Some(leg_id.to_string()),
        },
        "ringing" => CallEvent::CallRinging,
        "in-progress" | "answered" => CallEvent::CallAnswered,
        "completed" => ended(EndReason::Normal, None),
        "busy" => ended(EndReason::Busy, None),
        "no-answer" => ended(EndReason::NoAnswer, None),
        "canceled" => ended(EndReason::Cancelled, None),
        "failed" => ended(
            EndReason::Error,
            Some(
                form.get("ErrorMessage")
                    .cloned()
                    .unwrap_or_else(|| "telephony provider reported the call failed".to_string()),
            ),
        ),
        other => return Ok(Normalized::Ignored(format!("twilio status '{}'", other))),
    };

    let call = match form.get("call_id").and_then(|id| Uuid::parse_str(id).ok()) {
        Some(id) => CallRef::CallId(id),
        None => CallRef::TelephonyLeg(leg_id.to_string()),
    };

    let mut event = NormalizedEvent::new(kind, EventSource::Telephony);
    if let Some(sequence) = form.get("SequenceNumber").and_then(|s| s.parse().ok()) {
        event = event.with_sequence(sequence);
    }
    if let Some(at) = form
        .get("Timestamp")
        .and_then(|ts| DateTime::parse_from_rfc2822(ts).ok())
    {
        event = event.at(at.with_timezone(&Utc));
    }

    Ok(Normalized::Event(ProviderNotification { call, event }))
}

fn ended(reason: EndReason, detail: Option<String>) -> CallEvent {
    CallEvent::CallEnded { reason, detail }
}

fn ultravox_event(value: &Value) -> Result<Normalized> {
    let event_type = value
        .get("event")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::normalize("ultravox", "missing event type"))?;

    let kind = match event_type {
        "call.ended" => CallEvent::VoiceSessionEnded {
            reason: value
                .pointer("/call/endReason")
                .or_else(|| value.get("endReason"))
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        "transcript" | "call.transcript" => {
            let body = value.get("transcript").filter(|t| t.is_object()).unwrap_or(value);
            let is_final = body
                .get("final")
                .or_else(|| body.get("isFinal"))
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if !is_final {
                return Ok(Normalized::Ignored("partial transcript".to_string()));
            }
            CallEvent::TranscriptFragment(transcript_entry(body)?)
        }
        other => return Ok(Normalized::Ignored(format!("ultravox event '{}'", other))),
    };

    let call = ultravox_call_ref(value)
        .ok_or_else(|| OrchestratorError::normalize("ultravox", "no call reference"))?;

    Ok(Normalized::Event(ProviderNotification {
        call,
        event: NormalizedEvent::new(kind, EventSource::VoiceAi),
    }))
}

fn ultravox_call_ref(value: &Value) -> Option<CallRef> {
    let own_id = value
        .pointer("/metadata/call_id")
        .or_else(|| value.pointer("/call/metadata/call_id"))
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok());
    if let Some(id) = own_id {
        return Some(CallRef::CallId(id));
    }

    value
        .pointer("/call/callId")
        .or_else(|| value.get("callId"))
        .and_then(Value::as_str)
        .map(|session| CallRef::VoiceSession(session.to_string()))
}

fn transcript_entry(body: &Value) -> Result<TranscriptEntry> {
    let text = body
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OrchestratorError::normalize("ultravox", "transcript without text"))?;
    let speaker = Speaker::from_role(body.get("role").and_then(Value::as_str).unwrap_or("user"));
    let timestamp = body
        .get("timestamp")
        .and_then(parse_timestamp)
        .ok_or_else(|| OrchestratorError::normalize("ultravox", "transcript without timestamp"))?;

    let mut entry = TranscriptEntry::new(speaker, text, timestamp);
    if let Some(confidence) = body.get("confidence").and_then(Value::as_f64) {
        entry = entry.with_confidence(confidence as f32);
    }
    Ok(entry)
}

/// RFC 3339 strings, or epoch numbers in seconds or milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_f64()?;
            let millis = if raw > 1e12 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(pairs: &[(&str, &str)]) -> RawPayload {
        RawPayload::Form(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn event(normalized: Normalized) -> ProviderNotification {
        match normalized {
            Normalized::Event(n) => n,
            Normalized::Ignored(reason) => panic!("unexpectedly ignored: {}", reason),
        }
    }

    #[test]
    fn test_twilio_status_mapping() {
        let cases = [
            ("queued", "TelephonyAccepted"),
            ("initiated", "TelephonyAccepted"),
            ("ringing", "CallRinging"),
            ("in-progress", "CallAnswered"),
            ("answered", "CallAnswered"),
            ("completed", "CallEnded(normal)"),
            ("busy", "CallEnded(busy)"),
            ("no-answer", "CallEnded(no-answer)"),
            ("canceled", "CallEnded(cancelled)"),
            ("failed", "CallEnded(error)"),
        ];

        for (status, expected) in cases {
            let n = event(
                EventNormalizer::normalize(
                    Provider::Twilio,
                    &form(&[("CallSid", "CA1"), ("CallStatus", status)]),
                )
                .unwrap(),
            );
            assert_eq!(n.event.kind.to_string(), expected, "status {}", status);
            assert_eq!(n.event.source, EventSource::Telephony);
            assert_eq!(n.call, CallRef::TelephonyLeg("CA1".to_string()));
        }
    }

    #[test]
    fn test_twilio_sequence_timestamp_and_call_id() {
        let id = Uuid::new_v4();
        let n = event(
            EventNormalizer::normalize(
                Provider::Twilio,
                &form(&[
                    ("CallSid", "CA1"),
                    ("CallStatus", "ringing"),
                    ("SequenceNumber", "2"),
                    ("Timestamp", "Tue, 10 Jan 2023 20:54:56 +0000"),
                    ("call_id", &id.to_string()),
                ]),
            )
            .unwrap(),
        );

        assert_eq!(n.call, CallRef::CallId(id));
        assert_eq!(n.event.sequence, Some(2));
        assert_eq!(n.event.occurred_at.to_rfc3339(), "2023-01-10T20:54:56+00:00");
    }

    #[test]
    fn test_twilio_missing_sid_is_error() {
        let err = EventNormalizer::normalize(Provider::Twilio, &form(&[("CallStatus", "ringing")]))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Normalize { .. }));
    }

    #[test]
    fn test_twilio_unknown_status_ignored() {
        let n = EventNormalizer::normalize(
            Provider::Twilio,
            &form(&[("CallSid", "CA1"), ("CallStatus", "machine-detected")]),
        )
        .unwrap();
        assert!(matches!(n, Normalized::Ignored(_)));
    }

    #[test]
    fn test_ultravox_call_ended() {
        let id = Uuid::new_v4();
        let n = event(
            EventNormalizer::normalize(
                Provider::Ultravox,
                &RawPayload::Json(json!({
                    "event": "call.ended",
                    "call": { "callId": "uv-1", "endReason": "hangup", "metadata": { "call_id": id.to_string() } }
                })),
            )
            .unwrap(),
        );

        assert_eq!(n.call, CallRef::CallId(id));
        assert_eq!(
            n.event.kind,
            CallEvent::VoiceSessionEnded {
                reason: Some("hangup".to_string())
            }
        );
    }

    #[test]
    fn test_ultravox_transcript_fragment() {
        let n = event(
            EventNormalizer::normalize(
                Provider::Ultravox,
                &RawPayload::Json(json!({
                    "type": "transcript",
                    "callId": "uv-1",
                    "role": "agent",
                    "text": " Hello there ",
                    "timestamp": "2024-05-01T10:00:01Z",
                    "confidence": 0.9
                })),
            )
            .unwrap(),
        );

        assert_eq!(n.call, CallRef::VoiceSession("uv-1".to_string()));
        let CallEvent::TranscriptFragment(entry) = n.event.kind else {
            panic!("expected transcript fragment");
        };
        assert_eq!(entry.speaker, Speaker::Agent);
        assert_eq!(entry.text, "Hello there");
        assert_eq!(entry.confidence, Some(0.9));
        assert_eq!(entry.timestamp.to_rfc3339(), "2024-05-01T10:00:01+00:00");
    }

    #[test]
    fn test_ultravox_epoch_timestamps() {
        let secs = parse_timestamp(&json!(1_714_557_601)).unwrap();
        let millis = parse_timestamp(&json!(1_714_557_601_000_i64)).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn test_ultravox_partial_and_unknown_ignored() {
        let partial = EventNormalizer::normalize(
            Provider::Ultravox,
            &RawPayload::Json(json!({
                "type": "transcript", "callId": "uv-1", "role": "user",
                "text": "hel", "timestamp": 1, "final": false
            })),
        )
        .unwrap();
        assert!(matches!(partial, Normalized::Ignored(_)));

        let started = EventNormalizer::normalize(
            Provider::Ultravox,
            &RawPayload::Json(json!({ "event": "call.started", "call": { "callId": "uv-1" } })),
        )
        .unwrap();
        assert!(matches!(started, Normalized::Ignored(_)));
    }

    #[test]
    fn test_wrong_encoding_is_error() {
        assert!(EventNormalizer::normalize(Provider::Ultravox, &form(&[("a", "b")])).is_err());
        assert!("sip".parse::<Provider>().is_err());
        assert_eq!("Twilio".parse::<Provider>().unwrap(), Provider::Twilio);
    }

    #[test]
    fn test_inbound_announcement() {
        let inbound = EventNormalizer::normalize_inbound(
            Provider::Twilio,
            &form(&[("CallSid", "CA9"), ("From", "+14155551234"), ("To", "+18005550000")]),
        )
        .unwrap();

        assert_eq!(inbound.leg_id, "CA9");
        assert_eq!(inbound.caller, "+14155551234");
        assert_eq!(inbound.called, "+18005550000");
    }
}
