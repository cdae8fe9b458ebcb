//! RAII guards for provider-side resources.
//!
//! - [`VoiceSessionGuard`] - Terminates a voice-AI session unless the call
//!   that owns it is safely established

mod session_guard;

pub use session_guard::VoiceSessionGuard;
