use std::time::Duration;

use async_trait::async_trait;
use callbridge_core::{Sentiment, TranscriptEntry};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{check_status, require, ProviderError, Result};
use crate::traits::{AnalysisClient, AnalysisResult};

const PROVIDER: &str = "openai";
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert at summarizing phone conversations.
Generate a concise summary of the call including:
1. Main topic/purpose of the call
2. Key points discussed
3. Any action items or next steps
4. Overall sentiment of the conversation (positive, neutral, negative or mixed)

Format your response as JSON with keys: summary, key_points (array), action_items (array), sentiment";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 800,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// What the model is asked to return. Parsed leniently since models drift.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    summary: String,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default, alias = "key_topics")]
    key_points: Vec<String>,
    #[serde(default)]
    action_items: Vec<String>,
}

/// Post-call summarizer backed by an OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct OpenAiAnalysisClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiAnalysisClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        Ok(Self { client, config })
    }

    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String> {
        require(PROVIDER, "api_key", &self.config.api_key)?;
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.api_base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;

        let completion: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    message: e.to_string(),
                })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: "No choices returned".to_string(),
            })
    }
}

#[async_trait]
impl AnalysisClient for OpenAiAnalysisClient {
    async fn summarize(&self, transcript: &[TranscriptEntry]) -> Result<AnalysisResult> {
        debug!(entries = transcript.len(), model = %self.config.model, "Requesting call summary");

        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: SUMMARY_SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!(
                    "Please summarize this call transcript:\n\n{}",
                    format_transcript(transcript)
                ),
            },
        ];

        let content = self.chat_completion(messages).await?;
        Ok(parse_analysis(&content))
    }
}

fn format_transcript(transcript: &[TranscriptEntry]) -> String {
    if transcript.is_empty() {
        return "(no speech was captured)".to_string();
    }
    transcript
        .iter()
        .map(|entry| format!("{}: {}", entry.speaker.as_str().to_uppercase(), entry.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip a surrounding ```json (or bare ```) fence, if any.
fn unwrap_fenced(content: &str) -> &str {
    let body = if let Some((_, rest)) = content.split_once("```json") {
        rest
    } else if let Some((_, rest)) = content.split_once("```") {
        rest
    } else {
        return content.trim();
    };
    body.split("```").next().unwrap_or(body).trim()
}

/// Parse the model's reply. Anything that is not the requested JSON becomes
/// the summary text verbatim with a neutral sentiment.
pub(crate) fn parse_analysis(content: &str) -> AnalysisResult {
    match serde_json::from_str::<RawAnalysis>(unwrap_fenced(content)) {
        Ok(raw) => AnalysisResult {
            summary: raw.summary,
            sentiment: raw
                .sentiment
                .as_deref()
                .and_then(Sentiment::parse)
                .unwrap_or_default(),
            key_points: raw.key_points,
            action_items: raw.action_items,
        },
        Err(e) => {
            warn!(error = %e, "Analysis reply was not JSON, keeping raw text");
            AnalysisResult {
                summary: content.trim().to_string(),
                sentiment: Sentiment::Neutral,
                key_points: Vec::new(),
                action_items: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::Speaker;
    use chrono::Utc;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    #[test]
    fn test_parse_plain_json() {
        let result = parse_analysis(
            r#"{"summary":"Booked a table.","sentiment":"Positive","key_points":["table for two"],"action_items":["send confirmation"]}"#,
        );
        assert_eq!(result.summary, "Booked a table.");
        assert_eq!(result.sentiment, Sentiment::Positive);
        assert_eq!(result.action_items, vec!["send confirmation".to_string()]);
    }

    #[test]
    fn test_parse_fenced_json_with_key_topics() {
        let content = "Here you go:\n```json\n{\"summary\":\"Refund request.\",\"sentiment\":\"negative\",\"key_topics\":[\"refund\"]}\n```";
        let result = parse_analysis(content);
        assert_eq!(result.summary, "Refund request.");
        assert_eq!(result.sentiment, Sentiment::Negative);
        assert_eq!(result.key_points, vec!["refund".to_string()]);
    }

    #[test]
    fn test_parse_free_text_falls_back() {
        let result = parse_analysis("The caller asked about opening hours.");
        assert_eq!(result.summary, "The caller asked about opening hours.");
        assert_eq!(result.sentiment, Sentiment::Neutral);
        assert!(result.key_points.is_empty());
    }

    #[tokio::test]
    async fn test_summarize_sends_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_string_contains("AGENT: Hello, how can I help?"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"summary":"Greeting only.","sentiment":"neutral","key_points":[],"action_items":[]}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            OpenAiAnalysisClient::new(OpenAiConfig::new("sk-test").with_api_base_url(server.uri()))
                .unwrap();
        let transcript = vec![TranscriptEntry::new(
            Speaker::Agent,
            "Hello, how can I help?",
            Utc::now(),
        )];

        let result = client.summarize(&transcript).await.unwrap();
        assert_eq!(result.summary, "Greeting only.");
    }

    #[tokio::test]
    async fn test_summarize_rate_limited_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client =
            OpenAiAnalysisClient::new(OpenAiConfig::new("sk-test").with_api_base_url(server.uri()))
                .unwrap();
        let err = client.summarize(&[]).await.unwrap_err();
        assert!(err.is_transient());
    }
}
