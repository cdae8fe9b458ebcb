//! Post-call summarization.
//!
//! The automatic trigger is claimed inside the Completed transition (see
//! `CallOrchestrator::apply_locked`), so by the time a task is spawned here the
//! call is already marked as dispatched and no second task can exist for it.

use callbridge_core::{Call, CallSummary};
use chrono::Utc;
use events::Event;
use providers::{with_retry, ProviderError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::CallOrchestrator;

impl CallOrchestrator {
    /// Summarize a completed call in the background after the grace period.
    pub(crate) fn spawn_analysis(&self, call_id: Uuid) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.inner.config.analysis_grace).await;
            if let Err(e) = this.summarize_and_record(call_id).await {
                error!(call_id = %call_id, error = %e, "Post-call analysis could not be recorded");
            }
            this.inner.analyses_in_flight.remove(&call_id);
        });
    }

    /// Summarize a finished call on demand.
    ///
    /// Returns the existing summary when there is one. Refused while the call
    /// is still live or while another summarization for it is running.
    pub async fn analyze_call(&self, call_id: Uuid) -> Result<CallSummary> {
        {
            let _lock = self.inner.locks.acquire(call_id).await;
            let mut call = self.load(call_id).await?;

            if let Some(summary) = call.summary {
                return Ok(summary);
            }
            if !call.is_terminal() {
                return Err(OrchestratorError::Validation(format!(
                    "call {} is still {}; analysis runs once it has ended",
                    call_id, call.status
                )));
            }
            if self.inner.analyses_in_flight.insert(call_id, ()).is_some() {
                return Err(OrchestratorError::Validation(format!(
                    "analysis for call {} is already running",
                    call_id
                )));
            }
            if call.analysis_dispatched_at.is_none() {
                call.analysis_dispatched_at = Some(Utc::now());
                if let Err(e) = self.persist(&mut call).await {
                    self.inner.analyses_in_flight.remove(&call_id);
                    return Err(e);
                }
            }
        }

        info!(call_id = %call_id, "On-demand analysis requested");
        let result = self.summarize_and_record(call_id).await;
        self.inner.analyses_in_flight.remove(&call_id);

        let call = result?;
        match call.summary {
            Some(summary) => Ok(summary),
            None => Err(OrchestratorError::ProviderTransient {
                provider: "analysis",
                message: call
                    .analysis_error
                    .unwrap_or_else(|| "analysis produced no summary".to_string()),
            }),
        }
    }

    /// Run the analysis client against the call's transcript and record the
    /// outcome. Never changes the call's status.
    async fn summarize_and_record(&self, call_id: Uuid) -> Result<Call> {
        let call = self.load(call_id).await?;
        let retry = self.inner.config.analysis_retry;

        info!(call_id = %call_id, entries = call.transcript.len(), "Summarizing call");
        let result = with_retry(&retry, "summarize", || {
            self.inner.analysis.summarize(&call.transcript)
        })
        .await;

        self.record_analysis(call_id, result).await
    }

    async fn record_analysis(
        &self,
        call_id: Uuid,
        result: std::result::Result<providers::AnalysisResult, ProviderError>,
    ) -> Result<Call> {
        let _lock = self.inner.locks.acquire(call_id).await;
        let mut call = self.load(call_id).await?;

        match result {
            Ok(analysis) => {
                let summary = analysis.into_summary(Utc::now());
                let sentiment = summary.sentiment;
                if !call.attach_summary(summary) {
                    warn!(call_id = %call_id, "Call already has a summary, discarding new one");
                    return Ok(call);
                }
                self.persist(&mut call).await?;
                info!(call_id = %call_id, sentiment = sentiment.as_str(), "Call summary attached");
                self.emit(Event::SummaryAttached {
                    call_id,
                    sentiment: sentiment.as_str().to_string(),
                });
            }
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "Analysis failed, call keeps its status");
                call.analysis_error = Some(e.to_string());
                self.persist(&mut call).await?;
                self.emit(Event::AnalysisFailed {
                    call_id,
                    error: e.to_string(),
                });
            }
        }

        Ok(call)
    }
}
