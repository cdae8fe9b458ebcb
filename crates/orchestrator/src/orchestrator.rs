//! The call orchestrator: owns every call's lifecycle and is the only writer
//! of call records.

use std::sync::Arc;

use callbridge_core::{normalize_e164, Call, CallStatus, PromptConfig};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use db::CallStore;
use events::{Event, EventBus};
use providers::{
    with_retry, AnalysisClient, DialRequest, TelephonyClient, VoiceAiClient, VoiceSession,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::active_index::ActiveCallIndex;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::event::{ApplyOutcome, CallEvent, CallRef, EventSource, NormalizedEvent};
use crate::locks::CallLocks;
use crate::normalizer::{EventNormalizer, Normalized, Provider, RawPayload};
use crate::resources::VoiceSessionGuard;
use crate::state_machine::{CallStateMachine, Transition};
use crate::transcript::insert_fragment;

/// What the telephony provider needs to connect an inbound caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAnswer {
    pub call_id: Uuid,
    pub join_target: String,
}

/// Provider-side cleanup owed after a call went terminal.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Teardown {
    pub session_id: Option<String>,
    pub leg_id: Option<String>,
}

impl Teardown {
    /// Decide cleanup for a call that just reached a terminal state.
    ///
    /// The voice session is terminated unless it already ended, and only
    /// when the call never connected or was forced down internally. The
    /// telephony leg is hung up whenever the end was not reported by the
    /// telephony provider itself.
    fn plan(call: &Call, source: EventSource) -> Self {
        let session_id = if call.voice_session_ended_at.is_none()
            && (!call.was_answered() || source == EventSource::Internal)
        {
            call.voice_session_id.clone()
        } else {
            None
        };
        let leg_id = if source != EventSource::Telephony {
            call.telephony_leg_id.clone()
        } else {
            None
        };
        Self { session_id, leg_id }
    }

    fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.leg_id.is_none()
    }
}

/// Result of applying an event under the call's lock, plus the work to do
/// once the lock is released.
pub(crate) struct Applied {
    pub outcome: ApplyOutcome,
    pub call_id: Uuid,
    pub teardown: Teardown,
    pub dispatch_analysis: bool,
}

impl Applied {
    fn noop(call_id: Uuid, outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            call_id,
            teardown: Teardown::default(),
            dispatch_analysis: false,
        }
    }
}

pub(crate) struct Inner {
    pub store: Arc<dyn CallStore>,
    pub telephony: Arc<dyn TelephonyClient>,
    pub voice: Arc<dyn VoiceAiClient>,
    pub analysis: Arc<dyn AnalysisClient>,
    pub events: EventBus,
    pub locks: CallLocks,
    pub index: ActiveCallIndex,
    /// Calls with a summarization currently running in this process.
    pub analyses_in_flight: DashMap<Uuid, ()>,
    pub config: OrchestratorConfig,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CallOrchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl CallOrchestrator {
    pub fn new(
        store: Arc<dyn CallStore>,
        telephony: Arc<dyn TelephonyClient>,
        voice: Arc<dyn VoiceAiClient>,
        analysis: Arc<dyn AnalysisClient>,
        events: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        let index = ActiveCallIndex::new(config.active_cache_capacity);
        Self {
            inner: Arc::new(Inner {
                store,
                telephony,
                voice,
                analysis,
                events,
                locks: CallLocks::new(),
                index,
                analyses_in_flight: DashMap::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Number of non-terminal calls currently cached.
    pub fn active_calls(&self) -> usize {
        self.inner.index.len()
    }

    /// Reload the active-call working set from the store.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let count = self.inner.index.rebuild(self.inner.store.as_ref()).await?;
        info!(active_calls = count, "Active call index rebuilt");
        Ok(count)
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    /// Place an outbound call.
    ///
    /// The whole setup (persist, create voice session, dial) runs under the
    /// call's lock. If dialing fails after the voice session exists, the
    /// session is terminated before the error is returned.
    pub async fn initiate_call(
        &self,
        phone_number: &str,
        prompt: PromptConfig,
        metadata: Option<serde_json::Value>,
    ) -> Result<Call> {
        let number = normalize_e164(phone_number)?;
        if prompt.system_prompt.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "system prompt must not be empty".to_string(),
            ));
        }

        let mut call = Call::new_outbound(number, prompt);
        if let Some(metadata) = metadata {
            call = call.with_metadata(metadata);
        }
        let call_id = call.id;
        let _lock = self.inner.locks.acquire(call_id).await;

        self.persist(&mut call).await?;
        self.emit(Event::CallCreated {
            call_id,
            direction: call.direction.as_str().to_string(),
            phone_number: call.phone_number.clone(),
        });
        info!(call_id = %call_id, to = %call.phone_number, "Outbound call created");

        let retry = self.inner.config.provider_retry;
        let created = with_retry(&retry, "create_session", || {
            self.inner.voice.create_session(call_id, &call.prompt)
        })
        .await;
        let session = match created {
            Ok(session) => session,
            Err(e) => {
                error!(call_id = %call_id, error = %e, "Voice session creation failed");
                self.fail_setup(&mut call, format!("voice session could not be created: {}", e))
                    .await?;
                return Err(e.into());
            }
        };

        let mut session_guard =
            VoiceSessionGuard::new(call_id, &session, self.inner.voice.clone());
        call.voice_session_id = Some(session.session_id.clone());
        call.join_target = Some(session.join_target.clone());
        self.persist(&mut call).await?;

        let request = DialRequest {
            call_id,
            to: call.phone_number.clone(),
            from: None,
            join_target: session.join_target.clone(),
        };
        let leg = match with_retry(&retry, "dial", || self.inner.telephony.dial(&request)).await {
            Ok(leg) => leg,
            Err(e) => {
                error!(call_id = %call_id, error = %e, "Dial failed, tearing down voice session");
                session_guard.teardown().await;
                call.voice_session_ended_at = Some(Utc::now());
                self.fail_setup(&mut call, format!("telephony dial failed: {}", e))
                    .await?;
                return Err(e.into());
            }
        };

        let from = call.status;
        CallStateMachine::validate_transition(&from, &CallStatus::Initiating)?;
        call.telephony_leg_id = Some(leg.leg_id.clone());
        if leg.from_number.is_some() {
            call.from_number = leg.from_number;
        }
        call.status = CallStatus::Initiating;

        if let Err(e) = self.persist(&mut call).await {
            error!(call_id = %call_id, error = %e, "Could not record dialled leg, abandoning call");
            session_guard.teardown().await;
            self.hangup_best_effort(call_id, &leg.leg_id).await;
            return Err(e);
        }
        session_guard.disarm();

        self.emit_status_change(call_id, from, call.status);
        info!(call_id = %call_id, leg_id = %leg.leg_id, "Outbound call dialled");
        Ok(call)
    }

    async fn fail_setup(&self, call: &mut Call, detail: String) -> Result<()> {
        let from = call.status;
        call.end(CallStatus::Failed, Utc::now(), Some(detail));
        self.persist(call).await?;
        self.emit_status_change(call.id, from, call.status);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    /// Answer an inbound call: create the voice session first, then the call
    /// record, and hand back the join target without waiting long on the store.
    pub async fn handle_inbound_call(
        &self,
        provider: Provider,
        raw: &RawPayload,
    ) -> Result<InboundAnswer> {
        let inbound = EventNormalizer::normalize_inbound(provider, raw)?;

        if let Some(existing) = self.find_by_leg(&inbound.leg_id).await? {
            debug!(call_id = %existing.id, leg_id = %inbound.leg_id, "Inbound webhook redelivered");
            return Self::inbound_answer(existing);
        }

        let mut call = Call::new_inbound(
            &inbound.leg_id,
            &inbound.caller,
            &inbound.called,
            self.inner.config.inbound_prompt.clone(),
        );
        let call_id = call.id;

        let retry = self.inner.config.provider_retry;
        let session: VoiceSession = with_retry(&retry, "create_session", || {
            self.inner.voice.create_session(call_id, &call.prompt)
        })
        .await?;

        let mut guard = VoiceSessionGuard::new(call_id, &session, self.inner.voice.clone());
        call.voice_session_id = Some(session.session_id.clone());
        call.join_target = Some(session.join_target.clone());
        call.touch(Utc::now());

        // Taken before the call becomes findable and held by the persist task,
        // so events and redelivered webhooks for this call wait for the write.
        let lock = self.inner.locks.acquire(call_id).await;
        if let Err(owner) = self.inner.index.claim(&call) {
            drop(lock);
            debug!(leg_id = %inbound.leg_id, owner = %owner, "Concurrent inbound webhook lost the race");
            guard.teardown().await;
            let _owner_lock = self.inner.locks.acquire(owner).await;
            return Self::inbound_answer(self.load(owner).await?);
        }

        let this = self.clone();
        let record = call.clone();
        let persist = tokio::spawn(async move {
            let _lock = lock;
            let mut guard = guard;
            match this.inner.store.put(&record).await {
                Ok(()) => {
                    guard.disarm();
                    this.emit(Event::CallCreated {
                        call_id: record.id,
                        direction: record.direction.as_str().to_string(),
                        phone_number: record.phone_number.clone(),
                    });
                    info!(call_id = %record.id, from = %record.phone_number, "Inbound call created");
                    Ok(())
                }
                Err(e) => {
                    error!(call_id = %record.id, error = %e, "Failed to persist inbound call");
                    this.inner.index.remove(&record);
                    guard.teardown().await;
                    Err(OrchestratorError::from_store(e))
                }
            }
        });

        match tokio::time::timeout(self.inner.config.inbound_persist_timeout, persist).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(OrchestratorError::CorrelationConflict(_)))) => {
                let existing = self
                    .inner
                    .store
                    .find_by_telephony_leg(&inbound.leg_id)
                    .await?
                    .ok_or_else(|| OrchestratorError::NotFound(inbound.leg_id.clone()))?;
                return Self::inbound_answer(existing);
            }
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(join_error)) => {
                return Err(OrchestratorError::Internal(format!(
                    "inbound persist task failed: {}",
                    join_error
                )))
            }
            Err(_) => {
                warn!(call_id = %call_id, "Inbound call persist still pending, answering anyway");
            }
        }

        Ok(InboundAnswer {
            call_id,
            join_target: session.join_target,
        })
    }

    fn inbound_answer(call: Call) -> Result<InboundAnswer> {
        match call.join_target {
            Some(join_target) => Ok(InboundAnswer {
                call_id: call.id,
                join_target,
            }),
            None => Err(OrchestratorError::CorrelationConflict(format!(
                "call {} owns the leg but has no voice session",
                call.id
            ))),
        }
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Normalize a raw webhook, resolve its call and apply it.
    pub async fn apply_provider_event(
        &self,
        provider: Provider,
        raw: &RawPayload,
    ) -> Result<ApplyOutcome> {
        match EventNormalizer::normalize(provider, raw)? {
            Normalized::Ignored(reason) => {
                debug!(provider = provider.as_str(), reason = %reason, "Ignoring webhook");
                Ok(ApplyOutcome::Ignored)
            }
            Normalized::Event(notification) => {
                let call_id = self.resolve(&notification.call).await?;
                self.apply_event(call_id, notification.event).await
            }
        }
    }

    /// Apply one normalized event to a call. Idempotent; anomalies and
    /// duplicates are reported through the outcome, never as errors.
    pub async fn apply_event(&self, call_id: Uuid, event: NormalizedEvent) -> Result<ApplyOutcome> {
        let lock = self.inner.locks.acquire(call_id).await;
        let applied = self.apply_locked(call_id, &event).await?;
        drop(lock);

        let outcome = applied.outcome.clone();
        self.after_apply(applied).await;
        Ok(outcome)
    }

    /// Core of the event protocol. Caller holds the call's lock.
    pub(crate) async fn apply_locked(
        &self,
        call_id: Uuid,
        event: &NormalizedEvent,
    ) -> Result<Applied> {
        let mut call = self.load(call_id).await?;

        if let CallEvent::TranscriptFragment(fragment) = &event.kind {
            return self.append_fragment(call, fragment.clone(), event).await;
        }

        if call.is_terminal() {
            debug!(call_id = %call_id, event = %event.kind, status = %call.status, "Event for terminal call dropped");
            return Ok(Applied::noop(call_id, ApplyOutcome::Duplicate));
        }

        if event.source == EventSource::Telephony {
            if let (Some(seq), Some(last)) = (event.sequence, call.last_telephony_sequence) {
                if seq <= last {
                    debug!(call_id = %call_id, sequence = seq, last, "Telephony callback already applied");
                    return Ok(Applied::noop(call_id, ApplyOutcome::Duplicate));
                }
            }
        }

        if let Some(nominal) = event.kind.nominal_status() {
            if nominal == call.status {
                debug!(call_id = %call_id, event = %event.kind, "Redelivered event");
                return Ok(Applied::noop(call_id, ApplyOutcome::Duplicate));
            }
            if nominal.rank() < call.status.rank() {
                debug!(call_id = %call_id, event = %event.kind, status = %call.status, "Stale event dropped");
                return Ok(Applied::noop(call_id, ApplyOutcome::Stale));
            }
        }

        let transition = match CallStateMachine::transition_for(call.status, &event.kind) {
            Ok(transition) => transition,
            Err(e) => return Ok(self.anomaly(call_id, e)),
        };

        if event.source == EventSource::Telephony {
            if let Some(seq) = event.sequence {
                call.last_telephony_sequence = Some(seq);
            }
        }

        match transition {
            Transition::RecordSessionEnded => {
                if call.voice_session_ended_at.is_some() {
                    return Ok(Applied::noop(call_id, ApplyOutcome::Duplicate));
                }
                call.voice_session_ended_at = Some(event.occurred_at);
                self.persist(&mut call).await?;
                info!(call_id = %call_id, "Voice session ended while call in progress");
                Ok(Applied::noop(call_id, ApplyOutcome::SessionEndRecorded))
            }
            Transition::To(to) => self.transition(call, to, event).await,
            Transition::AppendTranscript => Ok(Applied::noop(call_id, ApplyOutcome::Ignored)),
        }
    }

    async fn transition(&self, mut call: Call, to: CallStatus, event: &NormalizedEvent) -> Result<Applied> {
        let call_id = call.id;
        let from = call.status;
        let now = Utc::now();

        if let CallEvent::TelephonyAccepted {
            leg_id: Some(leg_id),
        } = &event.kind
        {
            if call.telephony_leg_id.is_none() {
                call.telephony_leg_id = Some(leg_id.clone());
            }
        }

        let mut teardown = Teardown::default();
        let mut dispatch_analysis = false;

        if to == CallStatus::InProgress {
            call.answer(event.occurred_at);
        } else if to.is_terminal() {
            if let CallEvent::VoiceSessionEnded { .. } = event.kind {
                call.voice_session_ended_at = Some(event.occurred_at);
            }
            call.end(to, event.occurred_at, failure_detail(&event.kind));

            teardown = Teardown::plan(&call, event.source);
            if teardown.session_id.is_some() {
                call.voice_session_ended_at = Some(now);
            }

            if to == CallStatus::Completed && call.analysis_dispatched_at.is_none() {
                call.analysis_dispatched_at = Some(now);
                self.inner.analyses_in_flight.insert(call_id, ());
                dispatch_analysis = true;
            }
        } else {
            call.status = to;
        }

        if let Err(e) = self.persist(&mut call).await {
            if dispatch_analysis {
                self.inner.analyses_in_flight.remove(&call_id);
            }
            return Err(e);
        }

        info!(call_id = %call_id, from = %from, to = %to, event = %event.kind, "Call status changed");
        self.emit_status_change(call_id, from, to);

        Ok(Applied {
            outcome: ApplyOutcome::Applied { from, to },
            call_id,
            teardown,
            dispatch_analysis,
        })
    }

    async fn append_fragment(
        &self,
        mut call: Call,
        fragment: callbridge_core::TranscriptEntry,
        event: &NormalizedEvent,
    ) -> Result<Applied> {
        let call_id = call.id;

        if call.is_terminal() {
            if !call.was_answered() || !self.within_retention(&call, Utc::now()) {
                debug!(call_id = %call_id, "Transcript fragment for closed call dropped");
                return Ok(Applied::noop(call_id, ApplyOutcome::Stale));
            }
        } else if let Err(e) = CallStateMachine::transition_for(call.status, &event.kind) {
            return Ok(self.anomaly(call_id, e));
        }

        let speaker = fragment.speaker;
        let text = fragment.text.clone();
        if !insert_fragment(&mut call.transcript, fragment) {
            debug!(call_id = %call_id, "Duplicate transcript fragment");
            return Ok(Applied::noop(call_id, ApplyOutcome::Duplicate));
        }

        self.persist(&mut call).await?;
        self.emit(Event::TranscriptAppended {
            call_id,
            speaker: speaker.as_str().to_string(),
            text,
        });
        Ok(Applied::noop(call_id, ApplyOutcome::TranscriptAppended))
    }

    fn within_retention(&self, call: &Call, now: DateTime<Utc>) -> bool {
        let Some(ended_at) = call.ended_at else {
            return false;
        };
        (now - ended_at)
            .to_std()
            .map(|age| age <= self.inner.config.transcript_retention)
            .unwrap_or(true)
    }

    fn anomaly(&self, call_id: Uuid, err: OrchestratorError) -> Applied {
        let reason = err.to_string();
        warn!(call_id = %call_id, reason = %reason, "Call event anomaly, dropping event");
        self.emit(Event::CallAnomaly {
            call_id,
            reason: reason.clone(),
        });
        Applied::noop(call_id, ApplyOutcome::Anomaly(reason))
    }

    /// Work that must not run under the call's lock.
    pub(crate) async fn after_apply(&self, applied: Applied) {
        if !applied.teardown.is_empty() {
            self.teardown(applied.call_id, &applied.teardown).await;
        }
        if applied.dispatch_analysis {
            self.spawn_analysis(applied.call_id);
        }
    }

    async fn teardown(&self, call_id: Uuid, teardown: &Teardown) {
        if let Some(session_id) = &teardown.session_id {
            let retry = self.inner.config.provider_retry;
            match with_retry(&retry, "terminate_session", || {
                self.inner.voice.terminate_session(session_id)
            })
            .await
            {
                Ok(()) => debug!(call_id = %call_id, session_id = %session_id, "Voice session terminated"),
                Err(e) => warn!(call_id = %call_id, session_id = %session_id, error = %e, "Voice session teardown failed"),
            }
        }
        if let Some(leg_id) = &teardown.leg_id {
            self.hangup_best_effort(call_id, leg_id).await;
        }
    }

    async fn hangup_best_effort(&self, call_id: Uuid, leg_id: &str) {
        let retry = self.inner.config.provider_retry;
        if let Err(e) = with_retry(&retry, "hangup", || self.inner.telephony.hangup(leg_id)).await {
            warn!(call_id = %call_id, leg_id = %leg_id, error = %e, "Hangup failed");
        }
    }

    // ---------------------------------------------------------------------
    // Queries and user actions
    // ---------------------------------------------------------------------

    /// Ask the telephony provider to hang up. The status only changes when
    /// the provider reports the call ended.
    pub async fn end_call(&self, call_id: Uuid) -> Result<()> {
        let leg_id = {
            let _lock = self.inner.locks.acquire(call_id).await;
            let call = self.load(call_id).await?;
            if call.is_terminal() {
                debug!(call_id = %call_id, status = %call.status, "End requested for finished call");
                return Ok(());
            }
            call.telephony_leg_id.ok_or_else(|| {
                OrchestratorError::Validation(format!(
                    "call {} has no telephony leg yet",
                    call_id
                ))
            })?
        };

        let retry = self.inner.config.provider_retry;
        with_retry(&retry, "hangup", || self.inner.telephony.hangup(&leg_id)).await?;
        info!(call_id = %call_id, leg_id = %leg_id, "Hangup requested");
        Ok(())
    }

    pub async fn get_call(&self, call_id: Uuid) -> Result<Call> {
        self.load(call_id).await
    }

    /// Most recent calls first, optionally filtered by status.
    pub async fn list_calls(&self, status: Option<CallStatus>, limit: usize) -> Result<Vec<Call>> {
        match status {
            Some(status) => {
                let mut calls = self.inner.store.list_by_status(status).await?;
                calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                calls.truncate(limit);
                Ok(calls)
            }
            None => Ok(self.inner.store.list_recent(limit).await?),
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    pub(crate) async fn load(&self, call_id: Uuid) -> Result<Call> {
        if let Some(call) = self.inner.index.get(call_id) {
            return Ok(call);
        }
        self.inner
            .store
            .get(call_id)
            .await?
            .ok_or_else(|| OrchestratorError::call_not_found(call_id))
    }

    async fn find_by_leg(&self, leg_id: &str) -> Result<Option<Call>> {
        if let Some(id) = self.inner.index.resolve(&CallRef::TelephonyLeg(leg_id.to_string())) {
            return self.load(id).await.map(Some);
        }
        Ok(self.inner.store.find_by_telephony_leg(leg_id).await?)
    }

    /// Resolve a webhook's call reference: active index first, then the store.
    pub async fn resolve(&self, reference: &CallRef) -> Result<Uuid> {
        if let Some(id) = self.inner.index.resolve(reference) {
            return Ok(id);
        }

        let found = match reference {
            CallRef::CallId(id) => self.inner.store.get(*id).await?,
            CallRef::TelephonyLeg(leg) => self.inner.store.find_by_telephony_leg(leg).await?,
            CallRef::VoiceSession(session) => {
                self.inner.store.find_by_voice_session(session).await?
            }
        };
        found
            .map(|call| call.id)
            .ok_or_else(|| OrchestratorError::NotFound(reference.to_string()))
    }

    /// Write a call and refresh the index. Caller holds the call's lock.
    pub(crate) async fn persist(&self, call: &mut Call) -> Result<()> {
        call.touch(Utc::now());
        self.inner
            .store
            .put(call)
            .await
            .map_err(OrchestratorError::from_store)?;
        self.inner.index.upsert(call);
        Ok(())
    }

    pub(crate) fn emit(&self, event: Event) {
        self.inner.events.emit(event);
    }

    fn emit_status_change(&self, call_id: Uuid, from: CallStatus, to: CallStatus) {
        self.emit(Event::CallStatusChanged {
            call_id,
            from_status: from.as_str().to_string(),
            to_status: to.as_str().to_string(),
        });
    }
}

fn failure_detail(event: &CallEvent) -> Option<String> {
    match event {
        CallEvent::CallEnded {
            detail: Some(detail),
            ..
        } => Some(detail.clone()),
        CallEvent::CallEnded {
            reason: crate::event::EndReason::Error,
            detail: None,
        } => Some("call failed".to_string()),
        CallEvent::VoiceSessionEnded { reason } => Some(match reason {
            Some(reason) => format!("voice session ended before the call was answered ({})", reason),
            None => "voice session ended before the call was answered".to_string(),
        }),
        _ => None,
    }
}
