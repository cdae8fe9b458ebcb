//! RAII guard for voice-AI sessions created ahead of a telephony leg.
//!
//! A session is created before the call is dialled (outbound) or persisted
//! (inbound). Until the guard is disarmed, any exit path terminates it so a
//! session never outlives a call that never connected.

use std::sync::Arc;

use providers::{VoiceAiClient, VoiceSession};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct VoiceSessionGuard {
    call_id: Uuid,
    session_id: String,
    voice: Arc<dyn VoiceAiClient>,
    armed: bool,
}

impl VoiceSessionGuard {
    pub fn new(call_id: Uuid, session: &VoiceSession, voice: Arc<dyn VoiceAiClient>) -> Self {
        debug!(call_id = %call_id, session_id = %session.session_id, "Voice session guard armed");
        Self {
            call_id,
            session_id: session.session_id.clone(),
            voice,
            armed: true,
        }
    }

    /// The session now belongs to an established call.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Terminate the session now. Errors are logged; the provider expires
    /// abandoned sessions on its own eventually.
    pub async fn teardown(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        debug!(call_id = %self.call_id, session_id = %self.session_id, "Tearing down voice session");
        if let Err(e) = self.voice.terminate_session(&self.session_id).await {
            warn!(
                call_id = %self.call_id,
                session_id = %self.session_id,
                error = %e,
                "Failed to terminate voice session"
            );
        }
    }
}

impl Drop for VoiceSessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!(
            call_id = %self.call_id,
            session_id = %self.session_id,
            "Voice session guard dropped while armed - terminating session"
        );

        // Cannot await in Drop.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let voice = self.voice.clone();
        let session_id = std::mem::take(&mut self.session_id);
        let call_id = self.call_id;
        runtime.spawn(async move {
            if let Err(e) = voice.terminate_session(&session_id).await {
                warn!(
                    call_id = %call_id,
                    session_id = %session_id,
                    error = %e,
                    "Voice session cleanup failed in Drop"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callbridge_core::PromptConfig;
    use providers::Result as ProviderResult;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingVoice {
        terminated: Mutex<Vec<String>>,
    }

    impl RecordingVoice {
        fn terminated(&self) -> Vec<String> {
            self.terminated.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VoiceAiClient for RecordingVoice {
        async fn create_session(&self, _: Uuid, _: &PromptConfig) -> ProviderResult<VoiceSession> {
            unreachable!("not used by guard tests")
        }

        async fn terminate_session(&self, session_id: &str) -> ProviderResult<()> {
            self.terminated.lock().unwrap().push(session_id.to_string());
            Ok(())
        }
    }

    fn session() -> VoiceSession {
        VoiceSession {
            session_id: "uv-1".to_string(),
            join_target: "wss://voice/uv-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let voice = Arc::new(RecordingVoice::default());
        let mut guard = VoiceSessionGuard::new(Uuid::new_v4(), &session(), voice.clone());

        guard.teardown().await;
        guard.teardown().await;
        drop(guard);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(voice.terminated(), vec!["uv-1".to_string()]);
    }

    #[tokio::test]
    async fn test_disarmed_guard_leaves_session() {
        let voice = Arc::new(RecordingVoice::default());
        let mut guard = VoiceSessionGuard::new(Uuid::new_v4(), &session(), voice.clone());
        assert!(guard.is_armed());
        assert_eq!(guard.session_id(), "uv-1");

        guard.disarm();
        drop(guard);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(voice.terminated().is_empty());
    }

    #[tokio::test]
    async fn test_drop_while_armed_terminates() {
        let voice = Arc::new(RecordingVoice::default());
        drop(VoiceSessionGuard::new(Uuid::new_v4(), &session(), voice.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(voice.terminated(), vec!["uv-1".to_string()]);
    }
}
