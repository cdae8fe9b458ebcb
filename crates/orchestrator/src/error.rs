use callbridge_core::{CallStatus, CoreError};
use providers::ProviderError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Call not found: {0}")]
    NotFound(String),

    #[error("{provider} failed transiently: {message}")]
    ProviderTransient {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} rejected the request: {message}")]
    ProviderRejected {
        provider: &'static str,
        message: String,
    },

    #[error("Event {event} is not applicable to a call in {from}")]
    InvalidTransition { from: CallStatus, event: String },

    #[error("Timed out in {status} after {after_secs}s without provider events")]
    Timeout { status: CallStatus, after_secs: u64 },

    #[error("Correlation id already bound to another call: {0}")]
    CorrelationConflict(String),

    #[error("Could not normalize {provider} payload: {reason}")]
    Normalize { provider: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] db::DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn call_not_found(id: Uuid) -> Self {
        Self::NotFound(id.to_string())
    }

    pub fn normalize(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Normalize {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Map a store error, surfacing unique-index clashes as correlation conflicts.
    pub(crate) fn from_store(err: db::DbError) -> Self {
        match err {
            db::DbError::Conflict(message) => Self::CorrelationConflict(message),
            other => Self::Store(other),
        }
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        let provider = err.provider();
        if err.is_transient() {
            Self::ProviderTransient {
                provider,
                message: err.to_string(),
            }
        } else {
            Self::ProviderRejected {
                provider,
                message: err.to_string(),
            }
        }
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::CallNotFound(id) => Self::call_not_found(id),
            other => Self::Validation(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mapping() {
        let transient: OrchestratorError = ProviderError::Transient {
            provider: "twilio",
            message: "503".to_string(),
            status_code: Some(503),
        }
        .into();
        assert!(matches!(
            transient,
            OrchestratorError::ProviderTransient { provider: "twilio", .. }
        ));

        let rejected: OrchestratorError = ProviderError::InvalidResponse {
            provider: "ultravox",
            message: "missing joinUrl".to_string(),
        }
        .into();
        assert!(matches!(rejected, OrchestratorError::ProviderRejected { .. }));
    }

    #[test]
    fn test_conflict_mapping() {
        let err = OrchestratorError::from_store(db::DbError::Conflict("leg".to_string()));
        assert!(matches!(err, OrchestratorError::CorrelationConflict(_)));
    }

    #[test]
    fn test_timeout_message() {
        let err = OrchestratorError::Timeout {
            status: CallStatus::Ringing,
            after_secs: 120,
        };
        assert_eq!(
            err.to_string(),
            "Timed out in ringing after 120s without provider events"
        );
    }
}
