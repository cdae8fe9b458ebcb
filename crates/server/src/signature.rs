//! Provider webhook signatures.
//!
//! Twilio signs the public request URL followed by every form field, sorted by
//! name, with HMAC-SHA1 under the account auth token (base64). Ultravox signs
//! `{timestamp}.{body}` with HMAC-SHA256 under the webhook secret (hex).

use std::collections::HashMap;

use axum::http::{HeaderMap, Uri};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::error::AppError;

pub const TWILIO_SIGNATURE_HEADER: &str = "x-twilio-signature";
pub const ULTRAVOX_SIGNATURE_HEADER: &str = "x-ultravox-signature";
pub const ULTRAVOX_TIMESTAMP_HEADER: &str = "x-ultravox-timestamp";

#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    public_base_url: String,
    twilio_auth_token: String,
    ultravox_secret: Option<String>,
}

impl WebhookVerifier {
    pub fn new(public_base_url: impl Into<String>, twilio_auth_token: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            twilio_auth_token: twilio_auth_token.into(),
            ultravox_secret: None,
        }
    }

    pub fn with_ultravox_secret(mut self, secret: impl Into<String>) -> Self {
        self.ultravox_secret = Some(secret.into());
        self
    }

    /// The URL the provider called, as seen from outside any proxy.
    fn public_url(&self, uri: &Uri) -> String {
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        format!("{}{}", self.public_base_url.trim_end_matches('/'), path)
    }

    pub fn verify_twilio(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        params: &HashMap<String, String>,
    ) -> Result<(), AppError> {
        let provided = header(headers, TWILIO_SIGNATURE_HEADER)
            .ok_or_else(|| AppError::Forbidden("missing X-Twilio-Signature header".to_string()))?;
        let provided = STANDARD.decode(provided).map_err(|_| invalid("Twilio"))?;

        twilio_mac(&self.twilio_auth_token, &self.public_url(uri), params)?
            .verify_slice(&provided)
            .map_err(|_| invalid("Twilio"))
    }

    /// Only checked when a webhook secret is configured.
    pub fn verify_ultravox(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
        let Some(secret) = &self.ultravox_secret else {
            return Ok(());
        };
        let provided = header(headers, ULTRAVOX_SIGNATURE_HEADER).ok_or_else(|| {
            AppError::Forbidden("missing X-Ultravox-Signature header".to_string())
        })?;
        let timestamp = header(headers, ULTRAVOX_TIMESTAMP_HEADER).ok_or_else(|| {
            AppError::Forbidden("missing X-Ultravox-Timestamp header".to_string())
        })?;
        let provided = hex::decode(provided).map_err(|_| invalid("Ultravox"))?;

        ultravox_mac(secret, timestamp, body)?
            .verify_slice(&provided)
            .map_err(|_| invalid("Ultravox"))
    }
}

pub fn twilio_signature(
    auth_token: &str,
    url: &str,
    params: &HashMap<String, String>,
) -> Result<String, AppError> {
    let mac = twilio_mac(auth_token, url, params)?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn ultravox_signature(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, AppError> {
    let mac = ultravox_mac(secret, timestamp, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn twilio_mac(
    auth_token: &str,
    url: &str,
    params: &HashMap<String, String>,
) -> Result<Hmac<Sha1>, AppError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    mac.update(url.as_bytes());

    let mut pairs: Vec<_> = params.iter().collect();
    pairs.sort();
    for (key, value) in pairs {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Ok(mac)
}

fn ultravox_mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<Hmac<Sha256>, AppError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn invalid(provider: &str) -> AppError {
    tracing::warn!(provider, "Webhook signature mismatch");
    AppError::Forbidden(format!("invalid {} signature", provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params() -> HashMap<String, String> {
        HashMap::from([
            ("CallSid".to_string(), "CA100".to_string()),
            ("CallStatus".to_string(), "ringing".to_string()),
            ("From".to_string(), "+14155550199".to_string()),
        ])
    }

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("https://bridge.test/", "token").with_ultravox_secret("uv-secret")
    }

    #[test]
    fn test_twilio_signature_covers_url_and_every_field() {
        let uri: Uri = "/webhooks/twilio/status?call_id=abc".parse().unwrap();
        let signature = twilio_signature(
            "token",
            "https://bridge.test/webhooks/twilio/status?call_id=abc",
            &params(),
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(TWILIO_SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());

        assert!(verifier().verify_twilio(&headers, &uri, &params()).is_ok());

        let mut tampered = params();
        tampered.insert("CallStatus".to_string(), "completed".to_string());
        assert!(verifier().verify_twilio(&headers, &uri, &tampered).is_err());

        let other_uri: Uri = "/webhooks/twilio/status?call_id=xyz".parse().unwrap();
        assert!(verifier().verify_twilio(&headers, &other_uri, &params()).is_err());
    }

    #[test]
    fn test_twilio_signature_ignores_field_order() {
        let url = "https://bridge.test/webhooks/twilio/voice";
        let forward = twilio_signature("token", url, &params()).unwrap();
        let mut rebuilt = HashMap::new();
        for (k, v) in params().into_iter().collect::<Vec<_>>().into_iter().rev() {
            rebuilt.insert(k, v);
        }
        assert_eq!(forward, twilio_signature("token", url, &rebuilt).unwrap());
    }

    #[test]
    fn test_missing_twilio_signature_is_forbidden() {
        let uri: Uri = "/webhooks/twilio/voice".parse().unwrap();
        let err = verifier()
            .verify_twilio(&HeaderMap::new(), &uri, &params())
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_ultravox_signature() {
        let body = br#"{"event":"call.ended","callId":"uv-1"}"#;
        let signature = ultravox_signature("uv-secret", "1760000000", body).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(ULTRAVOX_SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());
        headers.insert(ULTRAVOX_TIMESTAMP_HEADER, HeaderValue::from_static("1760000000"));

        assert!(verifier().verify_ultravox(&headers, body).is_ok());
        assert!(verifier().verify_ultravox(&headers, b"{}").is_err());

        headers.remove(ULTRAVOX_TIMESTAMP_HEADER);
        assert!(verifier().verify_ultravox(&headers, body).is_err());
    }

    #[test]
    fn test_ultravox_unchecked_without_secret() {
        let verifier = WebhookVerifier::new("https://bridge.test", "token");
        assert!(verifier.verify_ultravox(&HeaderMap::new(), b"{}").is_ok());
    }
}
