use std::collections::HashMap;

use async_trait::async_trait;
use callbridge_core::{Call, CallStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DbError;

/// Keyed persistence for call records.
///
/// Implementations know nothing about call semantics: `put` is a plain
/// upsert keyed by call id. Correlation ids must be unique across calls when
/// present; violating writes fail with [`DbError::Conflict`].
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Call>, DbError>;

    async fn put(&self, call: &Call) -> Result<(), DbError>;

    async fn list_by_status(&self, status: CallStatus) -> Result<Vec<Call>, DbError>;

    async fn find_by_telephony_leg(&self, leg_id: &str) -> Result<Option<Call>, DbError>;

    async fn find_by_voice_session(&self, session_id: &str) -> Result<Option<Call>, DbError>;

    /// Most recently created calls first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Call>, DbError>;
}

/// In-process store, used by tests and single-node development setups.
#[derive(Default)]
pub struct MemoryCallStore {
    calls: RwLock<HashMap<Uuid, Call>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.read().await.is_empty()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn get(&self, id: Uuid) -> Result<Option<Call>, DbError> {
        Ok(self.calls.read().await.get(&id).cloned())
    }

    async fn put(&self, call: &Call) -> Result<(), DbError> {
        let mut calls = self.calls.write().await;

        let clash = calls.values().find(|other| {
            other.id != call.id
                && ((call.telephony_leg_id.is_some()
                    && other.telephony_leg_id == call.telephony_leg_id)
                    || (call.voice_session_id.is_some()
                        && other.voice_session_id == call.voice_session_id))
        });
        if let Some(other) = clash {
            return Err(DbError::Conflict(format!(
                "correlation id already bound to call {}",
                other.id
            )));
        }

        calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn list_by_status(&self, status: CallStatus) -> Result<Vec<Call>, DbError> {
        let mut found: Vec<Call> = self
            .calls
            .read()
            .await
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    async fn find_by_telephony_leg(&self, leg_id: &str) -> Result<Option<Call>, DbError> {
        Ok(self
            .calls
            .read()
            .await
            .values()
            .find(|c| c.telephony_leg_id.as_deref() == Some(leg_id))
            .cloned())
    }

    async fn find_by_voice_session(&self, session_id: &str) -> Result<Option<Call>, DbError> {
        Ok(self
            .calls
            .read()
            .await
            .values()
            .find(|c| c.voice_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Call>, DbError> {
        let mut all: Vec<Call> = self.calls.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::PromptConfig;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryCallStore::new();
        let call = Call::new_outbound("+14155551234", PromptConfig::new("hi"));

        store.put(&call).await.unwrap();
        let found = store.get(call.id).await.unwrap().unwrap();
        assert_eq!(found.phone_number, "+14155551234");
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryCallStore::new();
        let mut call = Call::new_outbound("+14155551234", PromptConfig::default());
        store.put(&call).await.unwrap();

        call.status = CallStatus::Ringing;
        store.put(&call).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.get(call.id).await.unwrap().unwrap().status,
            CallStatus::Ringing
        );
    }

    #[tokio::test]
    async fn test_correlation_conflict() {
        let store = MemoryCallStore::new();
        let mut first = Call::new_outbound("+14155551234", PromptConfig::default());
        first.telephony_leg_id = Some("CA1".to_string());
        store.put(&first).await.unwrap();

        let mut second = Call::new_outbound("+14155550000", PromptConfig::default());
        second.telephony_leg_id = Some("CA1".to_string());
        let err = store.put(&second).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_correlation_ids() {
        let store = MemoryCallStore::new();
        let mut call = Call::new_outbound("+14155551234", PromptConfig::default());
        call.telephony_leg_id = Some("CA9".to_string());
        call.voice_session_id = Some("uv-9".to_string());
        store.put(&call).await.unwrap();

        assert_eq!(
            store.find_by_telephony_leg("CA9").await.unwrap().unwrap().id,
            call.id
        );
        assert_eq!(
            store.find_by_voice_session("uv-9").await.unwrap().unwrap().id,
            call.id
        );
        assert!(store.find_by_telephony_leg("CA0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let store = MemoryCallStore::new();
        let pending = Call::new_outbound("+14155551234", PromptConfig::default());
        let mut ringing = Call::new_outbound("+14155550000", PromptConfig::default());
        ringing.status = CallStatus::Ringing;
        store.put(&pending).await.unwrap();
        store.put(&ringing).await.unwrap();

        let found = store.list_by_status(CallStatus::Ringing).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ringing.id);
    }
}
