//! Event bus: fan-out of job lifecycle events to connected clients.
//!
//! A single broadcast channel carries every event; each subscriber owns an
//! independent cursor into its ring buffer. The buffer is deliberately small
//! (64 events): a slow subscriber falls behind, observes `Lagged`, and the
//! SSE layer turns that into a `stream.resync` hint telling the client to
//! refetch the job list. Delivery is best-effort and at-most-once.
//!
//! Per-user filtering happens at the subscriber edge with
//! [`Event::visible_to`], not at publish time, so publishers never block on
//! or know about individual subscribers.

use tokio::sync::broadcast;

use crate::types::Event;

/// Per-subscriber buffer capacity. Overflow drops the oldest events for
/// that subscriber and surfaces as a resync hint, bounding memory per client.
pub const EVENT_BUFFER: usize = 64;

/// SSE event name a lagging subscriber receives instead of the dropped events
pub const RESYNC_EVENT: &str = "stream.resync";

/// Broadcast hub for lifecycle events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with the standard buffer capacity
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Publish an event to all subscribers.
    ///
    /// Never blocks: with no receivers the event is dropped, and a full
    /// subscriber buffer evicts that subscriber's oldest event instead of
    /// stalling the publisher.
    pub fn publish(&self, event: Event) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(event = event.sse_name(), "publishing event");
        }
        self.tx.send(event).ok();
    }

    /// Subscribe to the event stream.
    ///
    /// The receiver sees every event published after this call, subject to
    /// the buffer bound. Dropping the receiver unsubscribes immediately.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobId;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn removed(id: i64) -> Event {
        Event::JobRemoved {
            id: JobId::new(id),
            user_id: 1,
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_published_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(removed(1));

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                Event::JobRemoved { id, .. } => assert_eq!(id.get(), 1),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(removed(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_only_sees_events_after_subscribing() {
        let bus = EventBus::new();
        bus.publish(removed(1));

        let mut rx = bus.subscribe();
        bus.publish(removed(2));

        match rx.recv().await.unwrap() {
            Event::JobRemoved { id, .. } => {
                assert_eq!(id.get(), 2, "pre-subscription events are not replayed")
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_publish() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        // Overflow the ring buffer without ever receiving
        for i in 0..(EVENT_BUFFER as i64 + 10) {
            bus.publish(removed(i));
        }

        match rx.recv().await {
            Err(RecvError::Lagged(skipped)) => {
                assert!(
                    skipped >= 10,
                    "the subscriber must learn how far behind it fell"
                );
            }
            other => panic!("expected Lagged, got {other:?}"),
        }

        // After the lag signal the subscriber resumes from the oldest
        // retained event; the stream did not close.
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn dropping_a_receiver_unsubscribes_it() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
