use std::time::Duration;

use async_trait::async_trait;
use quick_xml::escape::escape;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{check_status, require, ProviderError, Result};
use crate::traits::{DialRequest, TelephonyClient, TelephonyLeg};

const PROVIDER: &str = "twilio";
pub const DEFAULT_API_BASE_URL: &str = "https://api.twilio.com";
const STATUS_CALLBACK_EVENTS: &str = "initiated ringing answered completed";

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Caller id used when the dial request does not override it.
    pub from_number: String,
    pub api_base_url: String,
    /// Absolute URL receiving status callbacks; `call_id` is appended per call.
    pub status_callback_url: Option<String>,
    pub ring_timeout_secs: u32,
    pub request_timeout: Duration,
}

impl TwilioConfig {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            status_callback_url: None,
            ring_timeout_secs: 30,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_status_callback_url(mut self, url: impl Into<String>) -> Self {
        self.status_callback_url = Some(url.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    #[serde(default)]
    from: Option<String>,
}

/// Twilio Programmable Voice REST client.
#[derive(Clone)]
pub struct TwilioClient {
    client: Client,
    config: TwilioConfig,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        Ok(Self { client, config })
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl TelephonyClient for TwilioClient {
    async fn dial(&self, request: &DialRequest) -> Result<TelephonyLeg> {
        require(PROVIDER, "account_sid", &self.config.account_sid)?;
        require(PROVIDER, "auth_token", &self.config.auth_token)?;
        let from = request
            .from
            .clone()
            .unwrap_or_else(|| self.config.from_number.clone());
        let twiml = connect_stream_twiml(&request.join_target);
        let timeout = self.config.ring_timeout_secs.to_string();

        let mut form: Vec<(&str, String)> = vec![
            ("To", request.to.clone()),
            ("From", from),
            ("Twiml", twiml),
            ("Timeout", timeout),
        ];
        if let Some(callback) = &self.config.status_callback_url {
            let separator = if callback.contains('?') { '&' } else { '?' };
            form.push((
                "StatusCallback",
                format!("{}{}call_id={}", callback, separator, request.call_id),
            ));
            form.push(("StatusCallbackEvent", STATUS_CALLBACK_EVENTS.to_string()));
        }

        debug!(call_id = %request.call_id, to = %request.to, "Dialing via Twilio");

        let response = self
            .client
            .post(format!("{}.json", self.calls_url()))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;

        let resource: CallResource = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        info!(call_id = %request.call_id, leg_id = %resource.sid, "Twilio accepted outbound call");
        Ok(TelephonyLeg {
            leg_id: resource.sid,
            from_number: resource.from,
        })
    }

    async fn hangup(&self, leg_id: &str) -> Result<()> {
        debug!(leg_id = %leg_id, "Hanging up Twilio leg");

        let response = self
            .client
            .post(format!("{}/{}.json", self.calls_url(), leg_id))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        check_status(PROVIDER, response).await?;
        Ok(())
    }
}

/// TwiML answer that streams the call's audio to `join_target`.
pub fn connect_stream_twiml(join_target: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Connect><Stream url=\"{}\"/></Connect></Response>",
        escape(join_target)
    )
}

/// TwiML answer that apologises and ends the call.
pub fn hangup_twiml(message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Say>{}</Say><Hangup/></Response>",
        escape(message)
    )
}
