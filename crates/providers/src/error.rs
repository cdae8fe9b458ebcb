use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Network failure, timeout, rate limit or 5xx. Worth retrying.
    #[error("{provider} transient failure: {message}")]
    Transient {
        provider: &'static str,
        message: String,
        status_code: Option<u16>,
    },

    /// The provider refused the request (invalid number, bad credentials, ...).
    #[error("{provider} rejected request ({status_code}): {message}")]
    Rejected {
        provider: &'static str,
        message: String,
        status_code: u16,
    },

    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} is not configured: {message}")]
    NotConfigured {
        provider: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Fail fast when a credential the request needs was never configured.
pub(crate) fn require(provider: &'static str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ProviderError::NotConfigured {
            provider,
            message: format!("{} is not set", field),
        });
    }
    Ok(())
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn provider(&self) -> &'static str {
        match self {
            ProviderError::Transient { provider, .. }
            | ProviderError::Rejected { provider, .. }
            | ProviderError::InvalidResponse { provider, .. }
            | ProviderError::NotConfigured { provider, .. } => provider,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(provider: &'static str, status: reqwest::StatusCode, body: String) -> Self {
        let code = status.as_u16();
        if code == 429 || status.is_server_error() {
            ProviderError::Transient {
                provider,
                message: body,
                status_code: Some(code),
            }
        } else {
            ProviderError::Rejected {
                provider,
                message: body,
                status_code: code,
            }
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(provider, status, err.to_string());
        }
        if err.is_decode() {
            return ProviderError::InvalidResponse {
                provider,
                message: err.to_string(),
            };
        }
        ProviderError::Transient {
            provider,
            message: err.to_string(),
            status_code: None,
        }
    }
}

/// Turn a response into an error unless its status is a success.
pub(crate) async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(provider, status, body))
}
