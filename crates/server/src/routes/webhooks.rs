//! Provider webhooks.
//!
//! Providers retry on non-2xx, and every event is idempotent on our side, so
//! status webhooks always acknowledge with 200 and report what happened in
//! the body instead. The one exception is a failed signature check, which
//! answers 403 when signatures are enforced.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use orchestrator::{ApplyOutcome, OrchestratorError, Provider, RawPayload};
use providers::twilio::{connect_stream_twiml, hangup_twiml};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{AppError, ErrorResponse};
use crate::state::AppState;

const UNAVAILABLE_MESSAGE: &str =
    "Sorry, our assistant is unavailable right now. Please try again later.";

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    /// What the event did: applied, duplicate, stale, anomaly, ignored or error.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WebhookAck {
    fn from_result(result: Result<ApplyOutcome, OrchestratorError>) -> Self {
        let (outcome, detail) = match result {
            Ok(ApplyOutcome::Applied { from, to }) => {
                ("applied", Some(format!("{} -> {}", from, to)))
            }
            Ok(ApplyOutcome::TranscriptAppended) => ("applied", Some("transcript".to_string())),
            Ok(ApplyOutcome::SessionEndRecorded) => {
                ("applied", Some("voice session ended".to_string()))
            }
            Ok(ApplyOutcome::Duplicate) => ("duplicate", None),
            Ok(ApplyOutcome::Stale) => ("stale", None),
            Ok(ApplyOutcome::Anomaly(reason)) => ("anomaly", Some(reason)),
            Ok(ApplyOutcome::Ignored) => ("ignored", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        Self {
            outcome: outcome.to_string(),
            detail,
        }
    }
}

fn twiml(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/xml")], body)
}

#[utoipa::path(
    post,
    path = "/webhooks/twilio/voice",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "TwiML connecting the caller to the voice agent, or a polite hang-up", content_type = "text/xml", body = String),
        (status = 403, description = "Signature missing or invalid", body = ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn twilio_voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Some(verifier) = &state.webhook_verifier {
        if let Err(e) = verifier.verify_twilio(&headers, &uri, &form) {
            return e.into_response();
        }
    }

    let raw = RawPayload::Form(form);
    match state
        .orchestrator
        .handle_inbound_call(Provider::Twilio, &raw)
        .await
    {
        Ok(answer) => {
            tracing::info!(call_id = %answer.call_id, "Connecting inbound caller to voice agent");
            twiml(connect_stream_twiml(&answer.join_target)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not answer inbound call");
            twiml(hangup_twiml(UNAVAILABLE_MESSAGE)).into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/webhooks/twilio/status",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Status callback acknowledged", body = WebhookAck),
        (status = 403, description = "Signature missing or invalid", body = ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn twilio_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    Form(mut form): Form<HashMap<String, String>>,
) -> Result<Json<WebhookAck>, AppError> {
    if let Some(verifier) = &state.webhook_verifier {
        verifier.verify_twilio(&headers, &uri, &form)?;
    }

    // The status callback URL carries our call id as a query parameter.
    for (key, value) in query {
        form.entry(key).or_insert(value);
    }

    let result = state
        .orchestrator
        .apply_provider_event(Provider::Twilio, &RawPayload::Form(form))
        .await;
    if let Err(e) = &result {
        tracing::warn!(error = %e, "Twilio status callback not applied");
    }
    Ok(Json(WebhookAck::from_result(result)))
}

#[utoipa::path(
    post,
    path = "/webhooks/ultravox",
    request_body(content = String, content_type = "application/json", description = "Ultravox webhook event"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 403, description = "Signature missing or invalid", body = ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn ultravox_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if let Some(verifier) = &state.webhook_verifier {
        verifier.verify_ultravox(&headers, &body)?;
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "Ultravox webhook body is not JSON");
            return Ok(Json(WebhookAck {
                outcome: "error".to_string(),
                detail: Some(format!("invalid JSON body: {}", e)),
            }));
        }
    };

    let result = state
        .orchestrator
        .apply_provider_event(Provider::Ultravox, &RawPayload::Json(payload))
        .await;
    if let Err(e) = &result {
        tracing::warn!(error = %e, "Ultravox webhook not applied");
    }
    Ok(Json(WebhookAck::from_result(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::CallStatus;

    #[test]
    fn test_ack_describes_outcome() {
        let ack = WebhookAck::from_result(Ok(ApplyOutcome::Applied {
            from: CallStatus::Ringing,
            to: CallStatus::InProgress,
        }));
        assert_eq!(ack.outcome, "applied");
        assert_eq!(ack.detail.as_deref(), Some("ringing -> in_progress"));

        let ack = WebhookAck::from_result(Err(OrchestratorError::NotFound("CA1".into())));
        assert_eq!(ack.outcome, "error");
        assert!(ack.detail.unwrap().contains("CA1"));
    }
}
