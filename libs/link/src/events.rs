//! Event delivery
//!
//! Category events from the foundation go to the application's
//! [`EventCallback`]s. Link lifecycle events go to at most one subscriber.

use crate::category::Category;
use crate::protocol::NegotiationLevel;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Consumer of category events
///
/// Called on the transport's receive task in arrival order; must not block.
pub trait EventCallback: Send + Sync {
    fn on_event(&self, level: NegotiationLevel, category: Category, payload: Bytes);
}

/// Logs and drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventCallback {
    pub transactional: bool,
}

impl LoggingEventCallback {
    pub fn transactional() -> Self {
        Self { transactional: true }
    }

    pub fn non_transactional() -> Self {
        Self { transactional: false }
    }
}

impl EventCallback for LoggingEventCallback {
    fn on_event(&self, level: NegotiationLevel, category: Category, payload: Bytes) {
        debug!(
            %level,
            %category,
            transactional = self.transactional,
            bytes = payload.len(),
            "Category event dropped, no callback registered"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A level finished negotiating and its categories are available
    LevelNegotiated(NegotiationLevel),
    /// The foundation abandoned the session
    ShutDown,
    /// The transport faulted after `connect()` returned; the link is `Disconnected`
    TransportFailed,
}

/// Single-subscriber event channel; a new subscriber replaces the old one
#[derive(Debug, Default)]
pub struct EventPublisher {
    subscriber: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock() = Some(tx);
        rx
    }

    pub fn publish(&self, event: LinkEvent) {
        let mut subscriber = self.subscriber.lock();
        match subscriber.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    trace!(?event, "Event subscriber gone");
                    *subscriber = None;
                }
            }
            None => trace!(?event, "No event subscriber"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_subscriber_replaces_old() {
        let publisher = EventPublisher::new();
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();

        publisher.publish(LinkEvent::ShutDown);

        assert_eq!(second.recv().await, Some(LinkEvent::ShutDown));
        assert_eq!(first.recv().await, None);
    }

    #[test]
    fn test_publish_without_subscriber_is_dropped() {
        let publisher = EventPublisher::new();
        publisher.publish(LinkEvent::LevelNegotiated(NegotiationLevel::Link));
        let rx = publisher.subscribe();
        drop(rx);
        publisher.publish(LinkEvent::ShutDown);
        assert!(publisher.subscriber.lock().is_none());
    }
}
