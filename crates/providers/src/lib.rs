//! Clients for the external systems a call depends on: the telephony
//! provider, the voice-AI provider and the post-call analysis model.

pub mod error;
pub mod openai;
pub mod retry;
pub mod traits;
pub mod twilio;
pub mod ultravox;

pub use error::{ProviderError, Result};
pub use openai::{OpenAiAnalysisClient, OpenAiConfig};
pub use retry::{with_retry, RetryPolicy};
pub use traits::{
    AnalysisClient, AnalysisResult, DialRequest, TelephonyClient, TelephonyLeg, VoiceAiClient,
    VoiceSession,
};
pub use twilio::{TwilioClient, TwilioConfig};
pub use ultravox::{UltravoxClient, UltravoxConfig};
