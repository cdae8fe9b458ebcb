use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use events::EventBus;
use orchestrator::CallOrchestrator;
use providers::{
    OpenAiAnalysisClient, OpenAiConfig, TwilioClient, TwilioConfig, UltravoxClient, UltravoxConfig,
};

use crate::config::AppConfig;
use crate::routes::sse::{EventBuffer, SharedEventBuffer, DEFAULT_EVENT_BUFFER_SIZE};
use crate::signature::WebhookVerifier;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: CallOrchestrator,
    pub event_bus: EventBus,
    pub event_buffer: SharedEventBuffer,
    /// Set when provider webhook signatures are enforced.
    pub webhook_verifier: Option<Arc<WebhookVerifier>>,
}

impl AppState {
    /// Wrap an orchestrator and start recording its notifications for SSE
    /// replay.
    pub fn new(orchestrator: CallOrchestrator) -> Self {
        let event_bus = orchestrator.events().clone();
        let event_buffer = Arc::new(RwLock::new(EventBuffer::new(DEFAULT_EVENT_BUFFER_SIZE)));
        EventBuffer::spawn_recorder(Arc::clone(&event_buffer), &event_bus);

        Self {
            orchestrator,
            event_bus,
            event_buffer,
            webhook_verifier: None,
        }
    }

    pub fn with_webhook_verifier(mut self, verifier: WebhookVerifier) -> Self {
        self.webhook_verifier = Some(Arc::new(verifier));
        self
    }

    /// Build the production stack: SQLite store, provider clients and the
    /// orchestrator on top of them.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let pool = db::create_pool(&config.server.database_url)
            .await
            .context("Failed to create database pool")?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        let store = Arc::new(db::CallRepository::new(pool));

        let mut twilio = TwilioConfig::new(
            &config.telephony.account_sid,
            &config.telephony.auth_token,
            &config.telephony.from_number,
        )
        .with_status_callback_url(config.status_callback_url());
        if let Some(url) = &config.telephony.api_base_url {
            twilio = twilio.with_api_base_url(url);
        }

        let mut ultravox = UltravoxConfig::new(&config.voice.api_key);
        ultravox.model = config.voice.model.clone();
        ultravox.voice = config.voice.voice.clone();
        ultravox.temperature = config.voice.temperature;
        if let Some(url) = &config.voice.api_base_url {
            ultravox = ultravox.with_api_base_url(url);
        }

        let mut openai =
            OpenAiConfig::new(&config.analysis.api_key).with_model(&config.analysis.model);
        if let Some(url) = &config.analysis.api_base_url {
            openai = openai.with_api_base_url(url);
        }

        let orchestrator = CallOrchestrator::new(
            store,
            Arc::new(TwilioClient::new(twilio).context("Failed to build telephony client")?),
            Arc::new(UltravoxClient::new(ultravox).context("Failed to build voice client")?),
            Arc::new(OpenAiAnalysisClient::new(openai).context("Failed to build analysis client")?),
            EventBus::new(),
            config.orchestrator_config(),
        );

        let state = Self::new(orchestrator);
        if !config.server.verify_webhook_signatures {
            return Ok(state);
        }
        let mut verifier = WebhookVerifier::new(
            &config.server.public_base_url,
            &config.telephony.auth_token,
        );
        if let Some(secret) = config.voice.webhook_secret.as_deref().filter(|s| !s.is_empty()) {
            verifier = verifier.with_ultravox_secret(secret);
        }
        Ok(state.with_webhook_verifier(verifier))
    }
}
