//! In-memory working set of non-terminal calls.
//!
//! A bounded cache in front of the call store. It is never the source of
//! truth: every entry mirrors a record that has been (or is being) written to
//! the store, and the whole index can be rebuilt from the store at any time.

use callbridge_core::{Call, CallStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use db::CallStore;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::event::CallRef;

pub struct ActiveCallIndex {
    calls: DashMap<Uuid, Call>,
    by_leg: DashMap<String, Uuid>,
    by_session: DashMap<String, Uuid>,
    capacity: usize,
}

impl ActiveCallIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            calls: DashMap::new(),
            by_leg: DashMap::new(),
            by_session: DashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<Call> {
        self.calls.get(&id).map(|c| c.clone())
    }

    pub fn resolve(&self, reference: &CallRef) -> Option<Uuid> {
        match reference {
            CallRef::CallId(id) => self.calls.contains_key(id).then_some(*id),
            CallRef::TelephonyLeg(leg) => self.by_leg.get(leg).map(|id| *id),
            CallRef::VoiceSession(session) => self.by_session.get(session).map(|id| *id),
        }
    }

    /// Mirror the latest version of a call. Terminal calls leave the index.
    pub fn upsert(&self, call: &Call) {
        if call.is_terminal() {
            self.remove(call);
            return;
        }
        if !self.calls.contains_key(&call.id) && self.calls.len() >= self.capacity {
            debug!(call_id = %call.id, capacity = self.capacity, "Active index full, not caching call");
            return;
        }
        self.link(call);
        self.calls.insert(call.id, call.clone());
    }

    /// Claim the call's telephony leg and cache the call in the same step,
    /// so whoever finds the leg also finds the call. Claims bypass the
    /// capacity bound. Fails with the id of the call already holding the leg.
    pub fn claim(&self, call: &Call) -> std::result::Result<(), Uuid> {
        let Some(leg) = &call.telephony_leg_id else {
            self.upsert(call);
            return Ok(());
        };
        match self.by_leg.entry(leg.clone()) {
            Entry::Occupied(existing) if *existing.get() != call.id => Err(*existing.get()),
            Entry::Occupied(_) => {
                self.calls.insert(call.id, call.clone());
                Ok(())
            }
            Entry::Vacant(slot) => {
                self.calls.insert(call.id, call.clone());
                if let Some(session) = &call.voice_session_id {
                    self.by_session.insert(session.clone(), call.id);
                }
                slot.insert(call.id);
                Ok(())
            }
        }
    }

    /// Forget a call and the correlation ids it carries.
    pub fn remove(&self, call: &Call) {
        match self.calls.remove(&call.id) {
            Some((_, cached)) => self.unlink(&cached),
            None => self.unlink(call),
        }
    }

    /// Drop everything and reload every non-terminal call from the store.
    pub async fn rebuild(&self, store: &dyn CallStore) -> Result<usize> {
        self.calls.clear();
        self.by_leg.clear();
        self.by_session.clear();

        for status in CallStatus::NON_TERMINAL {
            for call in store.list_by_status(status).await? {
                self.upsert(&call);
            }
        }
        Ok(self.len())
    }

    fn link(&self, call: &Call) {
        if let Some(leg) = &call.telephony_leg_id {
            self.by_leg.insert(leg.clone(), call.id);
        }
        if let Some(session) = &call.voice_session_id {
            self.by_session.insert(session.clone(), call.id);
        }
    }

    fn unlink(&self, call: &Call) {
        if let Some(leg) = &call.telephony_leg_id {
            self.by_leg.remove_if(leg, |_, v| *v == call.id);
        }
        if let Some(session) = &call.voice_session_id {
            self.by_session.remove_if(session, |_, v| *v == call.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::PromptConfig;
    use db::MemoryCallStore;

    fn call_with_leg(leg: &str) -> Call {
        let mut call = Call::new_outbound("+14155551234", PromptConfig::default());
        call.telephony_leg_id = Some(leg.to_string());
        call.voice_session_id = Some(format!("uv-{}", leg));
        call
    }

    #[test]
    fn test_resolve_by_every_reference() {
        let index = ActiveCallIndex::new(10);
        let call = call_with_leg("CA1");
        index.upsert(&call);

        assert_eq!(index.resolve(&CallRef::CallId(call.id)), Some(call.id));
        assert_eq!(index.resolve(&CallRef::TelephonyLeg("CA1".into())), Some(call.id));
        assert_eq!(index.resolve(&CallRef::VoiceSession("uv-CA1".into())), Some(call.id));
        assert_eq!(index.resolve(&CallRef::TelephonyLeg("CA2".into())), None);
    }

    #[test]
    fn test_terminal_calls_leave_the_index() {
        let index = ActiveCallIndex::new(10);
        let mut call = call_with_leg("CA1");
        index.upsert(&call);

        call.status = CallStatus::Completed;
        index.upsert(&call);

        assert!(index.is_empty());
        assert_eq!(index.resolve(&CallRef::TelephonyLeg("CA1".into())), None);
    }

    #[test]
    fn test_capacity_bound() {
        let index = ActiveCallIndex::new(1);
        let first = call_with_leg("CA1");
        let second = call_with_leg("CA2");

        index.upsert(&first);
        index.upsert(&second);
        assert_eq!(index.len(), 1);
        assert!(index.get(second.id).is_none());

        // Existing entries still refresh at capacity.
        let mut updated = first.clone();
        updated.status = CallStatus::Ringing;
        index.upsert(&updated);
        assert_eq!(index.get(first.id).unwrap().status, CallStatus::Ringing);
    }

    #[test]
    fn test_claim_caches_call_with_leg() {
        let index = ActiveCallIndex::new(10);
        let first = call_with_leg("CA1");
        let second = call_with_leg("CA1");

        assert!(index.claim(&first).is_ok());
        assert!(index.claim(&first).is_ok());
        assert_eq!(index.claim(&second), Err(first.id));

        assert_eq!(index.resolve(&CallRef::TelephonyLeg("CA1".into())), Some(first.id));
        assert!(index.get(first.id).is_some());
        assert!(index.get(second.id).is_none());
    }

    #[test]
    fn test_claim_ignores_capacity() {
        let index = ActiveCallIndex::new(1);
        index.upsert(&call_with_leg("CA1"));
        let inbound = call_with_leg("CA2");

        assert!(index.claim(&inbound).is_ok());
        assert!(index.get(inbound.id).is_some());
    }

    #[test]
    fn test_remove_uncached_call_unlinks_only_its_own_ids() {
        let index = ActiveCallIndex::new(1);
        let cached = call_with_leg("CA1");
        index.upsert(&cached);

        // Linked by a claim but evicted from the cache by hand.
        let claimed = call_with_leg("CA2");
        index.claim(&claimed).unwrap();
        index.calls.remove(&claimed.id);

        let mut ended = claimed.clone();
        ended.status = CallStatus::Completed;
        index.upsert(&ended);

        assert_eq!(index.resolve(&CallRef::TelephonyLeg("CA2".into())), None);
        assert_eq!(index.resolve(&CallRef::VoiceSession("uv-CA2".into())), None);
        assert_eq!(index.resolve(&CallRef::TelephonyLeg("CA1".into())), Some(cached.id));
    }

    #[tokio::test]
    async fn test_rebuild_from_store() {
        let store = MemoryCallStore::new();
        let mut ringing = call_with_leg("CA1");
        ringing.status = CallStatus::Ringing;
        let mut done = call_with_leg("CA2");
        done.status = CallStatus::Completed;
        store.put(&ringing).await.unwrap();
        store.put(&done).await.unwrap();

        let index = ActiveCallIndex::new(10);
        index.upsert(&call_with_leg("CA-stale"));

        assert_eq!(index.rebuild(&store).await.unwrap(), 1);
        assert!(index.get(ringing.id).is_some());
        assert!(index.get(done.id).is_none());
        assert_eq!(index.resolve(&CallRef::TelephonyLeg("CA-stale".into())), None);
    }
}
