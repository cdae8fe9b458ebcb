use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use events::EventBus;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::state::AppState;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1000;
pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub call_ids: Option<String>,
}

/// Recent notifications kept for `Last-Event-ID` replay.
pub struct EventBuffer {
    events: VecDeque<events::EventEnvelope>,
    max_size: usize,
}

impl EventBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, envelope: events::EventEnvelope) {
        if self.events.len() >= self.max_size {
            self.events.pop_front();
        }
        self.events.push_back(envelope);
    }

    pub fn events_after(&self, event_id: Uuid) -> Vec<events::EventEnvelope> {
        let mut found = false;
        self.events
            .iter()
            .filter_map(|envelope| {
                if found {
                    Some(envelope.clone())
                } else if envelope.id == event_id {
                    found = true;
                    None
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Copy every envelope published on `bus` into `buffer`. Does nothing
    /// outside a Tokio runtime.
    pub fn spawn_recorder(buffer: SharedEventBuffer, bus: &EventBus) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut rx = bus.subscribe();
        handle.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        buffer
                            .write()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push(envelope);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "SSE replay buffer lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}

pub type SharedEventBuffer = Arc<RwLock<EventBuffer>>;

fn parse_call_ids(call_ids: Option<&str>) -> Option<Vec<Uuid>> {
    call_ids.map(|s| {
        s.split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    })
}

fn wanted(call_ids: &Option<Vec<Uuid>>, envelope: &events::EventEnvelope) -> bool {
    match (call_ids, envelope.event.call_id()) {
        (Some(ids), Some(call_id)) => ids.contains(&call_id),
        _ => true,
    }
}

fn envelope_to_sse_event(envelope: &events::EventEnvelope) -> Result<Event, Infallible> {
    let event_type = match &envelope.event {
        events::Event::CallCreated { .. } => "call.created",
        events::Event::CallStatusChanged { .. } => "call.status_changed",
        events::Event::TranscriptAppended { .. } => "call.transcript_appended",
        events::Event::SummaryAttached { .. } => "call.summary_attached",
        events::Event::AnalysisFailed { .. } => "call.analysis_failed",
        events::Event::CallAnomaly { .. } => "call.anomaly",
        events::Event::OrphanReaped { .. } => "call.reaped",
        events::Event::Error { .. } => "error",
    };

    let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());

    Ok(Event::default()
        .id(envelope.id.to_string())
        .event(event_type)
        .data(data))
}

#[utoipa::path(
    get,
    path = "/api/events",
    params(
        ("call_ids" = Option<String>, Query, description = "Comma-separated call IDs to filter events"),
    ),
    responses(
        (status = 200, description = "SSE event stream"),
    ),
    tag = "events"
)]
pub async fn events_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: axum::http::HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let call_ids = parse_call_ids(query.call_ids.as_deref());
    let last_event_id = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<Uuid>().ok());

    let rx = state.event_bus.subscribe();

    let missed_events = if let Some(event_id) = last_event_id {
        state
            .event_buffer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .events_after(event_id)
    } else {
        vec![]
    };

    let replay_ids = call_ids.clone();
    let missed_stream = futures::stream::iter(
        missed_events
            .into_iter()
            .filter(move |e| wanted(&replay_ids, e))
            .map(|e| envelope_to_sse_event(&e)),
    );

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| {
        let call_ids = call_ids.clone();
        async move {
            match result {
                Ok(envelope) if wanted(&call_ids, &envelope) => {
                    Some(envelope_to_sse_event(&envelope))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("SSE broadcast error: {:?}", e);
                    None
                }
            }
        }
    });

    let stream = missed_stream.chain(live_stream);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(call_id: Uuid) -> events::EventEnvelope {
        events::EventEnvelope::new(events::Event::CallCreated {
            call_id,
            direction: "outbound".to_string(),
            phone_number: "+14155551234".to_string(),
        })
    }

    #[test]
    fn test_parse_call_ids_none() {
        assert!(parse_call_ids(None).is_none());
    }

    #[test]
    fn test_parse_call_ids_filters_invalid() {
        let uuid1 = Uuid::new_v4();
        let uuid2 = Uuid::new_v4();
        let input = format!("{} ,invalid, {}", uuid1, uuid2);
        let result = parse_call_ids(Some(&input)).unwrap();
        assert_eq!(result, vec![uuid1, uuid2]);
    }

    #[test]
    fn test_filter_keeps_events_without_call_id() {
        let wanted_id = Uuid::new_v4();
        let filter = Some(vec![wanted_id]);

        assert!(wanted(&filter, &created(wanted_id)));
        assert!(!wanted(&filter, &created(Uuid::new_v4())));
        assert!(wanted(
            &filter,
            &events::EventEnvelope::new(events::Event::Error {
                message: "boom".to_string(),
                context: None,
            })
        ));
        assert!(wanted(&None, &created(Uuid::new_v4())));
    }

    #[test]
    fn test_event_buffer_events_after() {
        let mut buffer = EventBuffer::new(3);

        let e1 = created(Uuid::new_v4());
        let e2 = created(Uuid::new_v4());
        let e3 = created(Uuid::new_v4());
        let id1 = e1.id;
        let id2 = e2.id;

        buffer.push(e1);
        buffer.push(e2);
        buffer.push(e3.clone());

        let after_first = buffer.events_after(id1);
        assert_eq!(after_first.len(), 2);
        assert_eq!(after_first[0].id, id2);

        let after_second = buffer.events_after(id2);
        assert_eq!(after_second.len(), 1);
        assert_eq!(after_second[0].id, e3.id);

        assert!(buffer.events_after(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_event_buffer_evicts_oldest() {
        let mut buffer = EventBuffer::new(2);

        let e1 = created(Uuid::new_v4());
        let e2 = created(Uuid::new_v4());
        let e3 = created(Uuid::new_v4());
        let id1 = e1.id;
        let id3 = e3.id;

        buffer.push(e1);
        buffer.push(e2.clone());
        buffer.push(e3);

        assert_eq!(buffer.len(), 2);
        assert!(buffer.events_after(id1).is_empty());
        assert_eq!(buffer.events_after(e2.id)[0].id, id3);
    }

    #[tokio::test]
    async fn test_recorder_copies_published_events() {
        let bus = EventBus::new();
        let buffer = Arc::new(RwLock::new(EventBuffer::new(10)));
        EventBuffer::spawn_recorder(Arc::clone(&buffer), &bus);

        bus.publish(created(Uuid::new_v4()));

        for _ in 0..50 {
            if !buffer.read().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(buffer.read().unwrap().len(), 1);
    }

    #[test]
    fn test_envelope_to_sse_event_does_not_panic() {
        let _event = envelope_to_sse_event(&created(Uuid::new_v4())).unwrap();
    }
}
