use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator::OrchestratorError;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    Unprocessable(String),
    BadGateway(String),
    Internal(String),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "provider_rejected", msg)
            }
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "provider_unavailable", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(msg) => AppError::BadRequest(msg),
            OrchestratorError::NotFound(msg) => AppError::NotFound(format!("Call not found: {}", msg)),
            OrchestratorError::CorrelationConflict(msg) => AppError::Conflict(msg),
            OrchestratorError::Normalize { .. } => AppError::BadRequest(err.to_string()),
            OrchestratorError::ProviderRejected { .. } => AppError::Unprocessable(err.to_string()),
            OrchestratorError::ProviderTransient { .. } => AppError::BadGateway(err.to_string()),
            other => {
                tracing::error!("Orchestrator error: {:?}", other);
                AppError::Internal(other.to_string())
            }
        }
    }
}
