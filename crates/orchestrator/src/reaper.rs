//! Periodic sweep that forces stuck calls to a terminal state.
//!
//! Webhooks can be lost. A call sitting in a non-terminal state with no
//! activity past its timeout is failed with a timeout detail and its
//! provider resources are released.

use std::time::Duration;

use callbridge_core::{Call, CallStatus};
use chrono::{DateTime, Utc};
use events::Event;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::event::{ApplyOutcome, CallEvent, EndReason, EventSource, NormalizedEvent};
use crate::orchestrator::CallOrchestrator;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    /// Non-terminal calls looked at.
    pub examined: usize,
    pub reaped: Vec<Uuid>,
}

impl CallOrchestrator {
    pub async fn reap_orphans(&self) -> Result<ReapReport> {
        self.reap_orphans_at(Utc::now()).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn reap_orphans_at(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        let mut report = ReapReport::default();

        for status in CallStatus::NON_TERMINAL {
            for call in self.inner.store.list_by_status(status).await? {
                report.examined += 1;
                if self.stale_for(&call, now).is_none() {
                    continue;
                }
                match self.reap_one(call.id, now).await {
                    Ok(true) => report.reaped.push(call.id),
                    Ok(false) => {}
                    Err(e) => warn!(call_id = %call.id, error = %e, "Failed to reap call"),
                }
            }
        }

        if !report.reaped.is_empty() {
            info!(examined = report.examined, reaped = report.reaped.len(), "Orphan sweep finished");
        }
        Ok(report)
    }

    /// The timeout a call has exceeded, if any.
    fn stale_for(&self, call: &Call, now: DateTime<Utc>) -> Option<Duration> {
        if call.is_terminal() {
            return None;
        }
        let limit = if call.status == CallStatus::InProgress {
            self.inner.config.max_call_duration
        } else {
            self.inner.config.orphan_timeout
        };
        let idle = (now - call.updated_at).to_std().ok()?;
        (idle > limit).then_some(limit)
    }

    /// Re-check under the lock so a webhook that just arrived wins.
    async fn reap_one(&self, call_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let lock = self.inner.locks.acquire(call_id).await;
        let call = self.load(call_id).await?;
        let Some(limit) = self.stale_for(&call, now) else {
            debug!(call_id = %call_id, "Call saw activity before reaping");
            return Ok(false);
        };

        let from = call.status;
        let detail = OrchestratorError::Timeout {
            status: from,
            after_secs: limit.as_secs(),
        }
        .to_string();
        let event = NormalizedEvent::new(
            CallEvent::CallEnded {
                reason: EndReason::Error,
                detail: Some(detail),
            },
            EventSource::Internal,
        );

        let applied = self.apply_locked(call_id, &event).await?;
        drop(lock);

        let reaped = matches!(applied.outcome, ApplyOutcome::Applied { .. });
        if reaped {
            warn!(call_id = %call_id, from = %from, "Reaped orphaned call");
            self.emit(Event::OrphanReaped {
                call_id,
                from_status: from.as_str().to_string(),
            });
        }
        self.after_apply(applied).await;
        Ok(reaped)
    }

    /// Run the sweep every `reap_interval` until the task is aborted.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.config.reap_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = this.inner.config.reap_interval.as_secs(), "Orphan reaper started");

            loop {
                ticker.tick().await;
                if let Err(e) = this.reap_orphans().await {
                    warn!(error = %e, "Orphan sweep failed");
                }
            }
        })
    }
}
