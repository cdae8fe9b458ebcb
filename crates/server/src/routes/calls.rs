use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use callbridge_core::{Call, CallStatus, CallSummary, PromptConfig};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCallRequest {
    /// Destination number; formatting characters are tolerated.
    pub phone_number: String,
    pub system_prompt: String,
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

impl CreateCallRequest {
    fn prompt(&self) -> PromptConfig {
        PromptConfig {
            system_prompt: self.system_prompt.clone(),
            greeting: self.greeting.clone(),
            voice: self.voice.clone(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListCallsQuery {
    /// Only calls currently in this status.
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EndCallResponse {
    pub call_id: Uuid,
    /// Status at the time of the request; the final status follows from
    /// the provider's confirmation.
    pub status: CallStatus,
}

#[utoipa::path(
    post,
    path = "/api/calls",
    request_body = CreateCallRequest,
    responses(
        (status = 201, description = "Call dialled", body = Call),
        (status = 400, description = "Invalid phone number or prompt"),
        (status = 422, description = "Provider rejected the call"),
        (status = 502, description = "Provider unavailable")
    ),
    tag = "calls"
)]
pub async fn create_call(
    State(state): State<AppState>,
    Json(payload): Json<CreateCallRequest>,
) -> Result<(StatusCode, Json<Call>), AppError> {
    let call = state
        .orchestrator
        .initiate_call(&payload.phone_number, payload.prompt(), payload.metadata)
        .await?;

    Ok((StatusCode::CREATED, Json(call)))
}

#[utoipa::path(
    get,
    path = "/api/calls",
    params(ListCallsQuery),
    responses(
        (status = 200, description = "Most recent calls first", body = Vec<Call>),
        (status = 400, description = "Unknown status filter")
    ),
    tag = "calls"
)]
pub async fn list_calls(
    State(state): State<AppState>,
    Query(query): Query<ListCallsQuery>,
) -> Result<Json<Vec<Call>>, AppError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            CallStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown call status: {}", s)))?,
        ),
        None => None,
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let calls = state.orchestrator.list_calls(status, limit).await?;
    Ok(Json(calls))
}

#[utoipa::path(
    get,
    path = "/api/calls/{id}",
    params(("id" = Uuid, Path, description = "Call ID")),
    responses(
        (status = 200, description = "Current call record", body = Call),
        (status = 404, description = "Call not found")
    ),
    tag = "calls"
)]
pub async fn get_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Call>, AppError> {
    Ok(Json(state.orchestrator.get_call(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/calls/{id}/end",
    params(("id" = Uuid, Path, description = "Call ID")),
    responses(
        (status = 202, description = "Hang-up requested", body = EndCallResponse),
        (status = 400, description = "Call has no telephony leg yet"),
        (status = 404, description = "Call not found")
    ),
    tag = "calls"
)]
pub async fn end_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<EndCallResponse>), AppError> {
    state.orchestrator.end_call(id).await?;
    let call = state.orchestrator.get_call(id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EndCallResponse {
            call_id: id,
            status: call.status,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/calls/{id}/analyze",
    params(("id" = Uuid, Path, description = "Call ID")),
    responses(
        (status = 200, description = "Call summary", body = CallSummary),
        (status = 400, description = "Call still live or analysis already running"),
        (status = 404, description = "Call not found"),
        (status = 502, description = "Analysis provider unavailable")
    ),
    tag = "calls"
)]
pub async fn analyze_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CallSummary>, AppError> {
    Ok(Json(state.orchestrator.analyze_call(id).await?))
}
