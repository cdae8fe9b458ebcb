//! Broadcast bus for call lifecycle events

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{Event, EventEnvelope};

const DEFAULT_CAPACITY: usize = 1000;

/// Fan-out of call events to any number of subscribers.
///
/// Publishing never blocks and never fails: with no subscribers the event
/// is dropped, and slow subscribers observe `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    published: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish an envelope, returning how many subscribers received it.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Wrap `event` in a fresh envelope and publish it.
    pub fn emit(&self, event: Event) -> usize {
        self.publish(EventEnvelope::new(event))
    }

    /// Events published before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn event_count(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status_changed(call_id: Uuid, to: &str) -> Event {
        Event::CallStatusChanged {
            call_id,
            from_status: "pending".to_string(),
            to_status: to.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let envelope = EventEnvelope::new(status_changed(Uuid::new_v4(), "initiating"));
        assert_eq!(bus.publish(envelope.clone()), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, envelope.id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_same_order() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let call_id = Uuid::new_v4();

        assert_eq!(bus.emit(status_changed(call_id, "initiating")), 2);
        bus.emit(status_changed(call_id, "ringing"));

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(matches!(first.event, Event::CallStatusChanged { ref to_status, .. } if to_status == "initiating"));
            assert!(matches!(second.event, Event::CallStatusChanged { ref to_status, .. } if to_status == "ringing"));
        }
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(status_changed(Uuid::new_v4(), "ringing")), 0);
        assert_eq!(bus.event_count(), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        let call_id = Uuid::new_v4();

        for to in ["initiating", "ringing", "in_progress"] {
            bus.emit(status_changed(call_id, to));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }

    #[test]
    fn test_clone_shares_channel() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        let _rx = bus2.subscribe();
        assert_eq!(bus1.subscriber_count(), 1);

        bus2.emit(Event::Error {
            message: "test".to_string(),
            context: None,
        });
        assert_eq!(bus1.event_count(), 1);
    }
}
