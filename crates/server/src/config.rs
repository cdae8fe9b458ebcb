use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use callbridge_core::PromptConfig;
use orchestrator::OrchestratorConfig;
use providers::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONFIG_FILE: &str = "callbridge.toml";

/// Service configuration, read from `callbridge.toml` with secrets
/// overridable from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub telephony: TelephonySection,
    pub voice: VoiceSection,
    pub analysis: AnalysisSection,
    pub orchestrator: OrchestratorSection,
    pub inbound: InboundSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL; webhooks and status callbacks point here.
    pub public_base_url: String,
    pub database_url: String,
    /// Reject provider webhooks whose signature header does not match.
    pub verify_webhook_signatures: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            public_base_url: "http://localhost:3001".to_string(),
            database_url: "sqlite:callbridge.db".to_string(),
            verify_webhook_signatures: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelephonySection {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceSection {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub temperature: f32,
    /// Signing secret for Ultravox webhooks. Unsigned when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

impl Default for VoiceSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: None,
            model: "fixie-ai/ultravox".to_string(),
            voice: None,
            temperature: 0.3,
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisSection {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    pub model: String,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorSection {
    pub orphan_timeout_secs: u64,
    pub max_call_duration_secs: u64,
    pub reap_interval_secs: u64,
    pub transcript_retention_secs: u64,
    pub analysis_grace_secs: u64,
    pub inbound_persist_timeout_ms: u64,
    pub active_cache_capacity: usize,
    pub provider_max_attempts: u32,
    pub analysis_max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            orphan_timeout_secs: 120,
            max_call_duration_secs: 4 * 60 * 60,
            reap_interval_secs: 30,
            transcript_retention_secs: 600,
            analysis_grace_secs: 2,
            inbound_persist_timeout_ms: 500,
            active_cache_capacity: 10_000,
            provider_max_attempts: 3,
            analysis_max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InboundSection {
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

impl Default for InboundSection {
    fn default() -> Self {
        let prompt = OrchestratorConfig::default().inbound_prompt;
        Self {
            system_prompt: prompt.system_prompt,
            greeting: prompt.greeting,
        }
    }
}

impl AppConfig {
    /// Read the file at `path`, falling back to defaults when it does not
    /// exist, then apply environment overrides.
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            Self::default()
        };

        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override secrets and deployment URLs from `lookup` (the process
    /// environment in production).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let overrides: [(&str, &mut String); 7] = [
            ("TWILIO_ACCOUNT_SID", &mut self.telephony.account_sid),
            ("TWILIO_AUTH_TOKEN", &mut self.telephony.auth_token),
            ("TWILIO_PHONE_NUMBER", &mut self.telephony.from_number),
            ("ULTRAVOX_API_KEY", &mut self.voice.api_key),
            ("OPENAI_API_KEY", &mut self.analysis.api_key),
            ("CALLBRIDGE_DATABASE_URL", &mut self.server.database_url),
            ("CALLBRIDGE_PUBLIC_URL", &mut self.server.public_base_url),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Where the telephony provider should send status callbacks.
    pub fn status_callback_url(&self) -> String {
        format!(
            "{}/webhooks/twilio/status",
            self.server.public_base_url.trim_end_matches('/')
        )
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let o = &self.orchestrator;
        let retry = |attempts| {
            RetryPolicy::new(
                attempts,
                Duration::from_millis(o.initial_backoff_ms),
                Duration::from_millis(o.max_backoff_ms),
            )
        };

        let mut inbound_prompt = PromptConfig::new(self.inbound.system_prompt.clone());
        inbound_prompt.greeting = self.inbound.greeting.clone();
        inbound_prompt.voice = self.voice.voice.clone();

        OrchestratorConfig {
            orphan_timeout: Duration::from_secs(o.orphan_timeout_secs),
            max_call_duration: Duration::from_secs(o.max_call_duration_secs),
            reap_interval: Duration::from_secs(o.reap_interval_secs.max(1)),
            transcript_retention: Duration::from_secs(o.transcript_retention_secs),
            analysis_grace: Duration::from_secs(o.analysis_grace_secs),
            inbound_persist_timeout: Duration::from_millis(o.inbound_persist_timeout_ms),
            active_cache_capacity: o.active_cache_capacity,
            provider_retry: retry(o.provider_max_attempts),
            analysis_retry: retry(o.analysis_max_attempts),
            inbound_prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.orchestrator.orphan_timeout_secs, 120);
        assert_eq!(config.analysis.model, "gpt-4o-mini");
        assert!(!config.inbound.system_prompt.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            port = 8080

            [orchestrator]
            orphan_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.orchestrator.orphan_timeout_secs, 60);
        assert_eq!(config.orchestrator.reap_interval_secs, 30);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(AppConfig::from_toml("[server\nport = ").is_err());
    }

    #[test]
    fn test_env_overrides_secrets() {
        let env: HashMap<&str, &str> = [
            ("TWILIO_AUTH_TOKEN", "secret"),
            ("OPENAI_API_KEY", "sk-test"),
            ("CALLBRIDGE_PUBLIC_URL", "https://calls.example.com/"),
            ("ULTRAVOX_API_KEY", "  "),
        ]
        .into_iter()
        .collect();

        let mut base = AppConfig::default();
        base.voice.api_key = "from-file".to_string();
        let config = base.with_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.telephony.auth_token, "secret");
        assert_eq!(config.analysis.api_key, "sk-test");
        assert_eq!(config.voice.api_key, "from-file");
        assert_eq!(
            config.status_callback_url(),
            "https://calls.example.com/webhooks/twilio/status"
        );
    }

    #[test]
    fn test_orchestrator_config_conversion() {
        let mut config = AppConfig::default();
        config.orchestrator.provider_max_attempts = 5;
        config.inbound.greeting = Some("Welcome!".to_string());

        let converted = config.orchestrator_config();
        assert_eq!(converted.orphan_timeout, Duration::from_secs(120));
        assert_eq!(converted.max_call_duration, Duration::from_secs(14_400));
        assert_eq!(converted.provider_retry.max_attempts, 5);
        assert_eq!(converted.inbound_prompt.greeting.as_deref(), Some("Welcome!"));
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::load(&temp_dir.path().join(CONFIG_FILE))
            .await
            .unwrap();
        assert_eq!(config.server.port, 3001);
    }

    #[tokio::test]
    async fn test_write_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.telephony.from_number = "+18005550000".to_string();
        tokio::fs::write(&path, config.to_toml().unwrap()).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.telephony.from_number, "+18005550000");
        assert_eq!(loaded.orchestrator, config.orchestrator);
    }
}
