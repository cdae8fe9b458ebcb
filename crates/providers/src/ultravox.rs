use std::time::Duration;

use async_trait::async_trait;
use callbridge_core::PromptConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{check_status, require, ProviderError, Result};
use crate::traits::{VoiceAiClient, VoiceSession};

const PROVIDER: &str = "ultravox";
pub const DEFAULT_API_BASE_URL: &str = "https://api.ultravox.ai";

#[derive(Debug, Clone)]
pub struct UltravoxConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub model: String,
    /// Voice used when the prompt does not pick one.
    pub voice: Option<String>,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl UltravoxConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: "fixie-ai/ultravox".to_string(),
            voice: None,
            temperature: 0.3,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallRequest<'a> {
    system_prompt: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
    temperature: f32,
    medium: Medium,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_speaker: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_speaker_message: Option<&'a str>,
    metadata: Metadata,
}

#[derive(Debug, Serialize)]
struct Medium {
    twilio: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Metadata {
    call_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallResponse {
    call_id: String,
    join_url: String,
}

/// Ultravox REST client. Each call gets its own Ultravox "call", which is
/// what the rest of the system calls a voice session.
#[derive(Clone)]
pub struct UltravoxClient {
    client: Client,
    config: UltravoxConfig,
}

impl UltravoxClient {
    pub fn new(config: UltravoxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        Ok(Self { client, config })
    }

    fn calls_url(&self) -> String {
        format!("{}/api/calls", self.config.api_base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl VoiceAiClient for UltravoxClient {
    async fn create_session(&self, call_id: Uuid, prompt: &PromptConfig) -> Result<VoiceSession> {
        require(PROVIDER, "api_key", &self.config.api_key)?;
        let request = CreateCallRequest {
            system_prompt: &prompt.system_prompt,
            model: &self.config.model,
            voice: prompt.voice.as_deref().or(self.config.voice.as_deref()),
            temperature: self.config.temperature,
            medium: Medium {
                twilio: serde_json::Map::new(),
            },
            first_speaker: prompt.greeting.as_ref().map(|_| "FIRST_SPEAKER_AGENT"),
            first_speaker_message: prompt.greeting.as_deref(),
            metadata: Metadata {
                call_id: call_id.to_string(),
            },
        };

        debug!(call_id = %call_id, "Creating Ultravox session");

        let response = self
            .client
            .post(self.calls_url())
            .header("X-API-Key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;

        let created: CreateCallResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    message: e.to_string(),
                })?;

        info!(call_id = %call_id, session_id = %created.call_id, "Ultravox session created");
        Ok(VoiceSession {
            session_id: created.call_id,
            join_target: created.join_url,
        })
    }

    async fn terminate_session(&self, session_id: &str) -> Result<()> {
        debug!(session_id = %session_id, "Terminating Ultravox session");

        let response = self
            .client
            .delete(format!("{}/{}", self.calls_url(), session_id))
            .header("X-API-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        // Already gone counts as terminated.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(PROVIDER, response).await?;
        Ok(())
    }
}
