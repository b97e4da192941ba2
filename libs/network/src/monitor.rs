//! Exception Monitor
//!
//! Faults raised on the receive task cannot be returned to anyone: the task
//! has no caller. They are parked here instead, and whoever is blocked on the
//! link (typically `connect()`) races `wait()` against its own completion
//! signal and replays the faults with `take()`.
//!
//! The signal is level-triggered: `wait()` resolves immediately while any
//! exception is pending, no matter when the waiter subscribed.

use crate::error::TransportError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Guarded list of receive-task faults plus a pending signal
#[derive(Debug, Clone)]
pub struct ExceptionMonitor {
    inner: Arc<MonitorInner>,
}

#[derive(Debug)]
struct MonitorInner {
    errors: Mutex<Vec<TransportError>>,
    pending: watch::Sender<bool>,
}

impl ExceptionMonitor {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(false);
        Self {
            inner: Arc::new(MonitorInner {
                errors: Mutex::new(Vec::new()),
                pending,
            }),
        }
    }

    /// Record a fault and wake every waiter
    pub fn post(&self, error: TransportError) {
        debug!(category = error.category(), error = %error, "Exception posted to monitor");
        self.inner.errors.lock().push(error);
        self.inner.pending.send_replace(true);
    }

    /// Resolve once at least one exception is pending
    pub async fn wait(&self) {
        let mut pending = self.inner.pending.subscribe();
        // The sender lives as long as `self`, so this only returns on `true`
        let _ = pending.wait_for(|pending| *pending).await;
    }

    pub fn has_exception(&self) -> bool {
        !self.inner.errors.lock().is_empty()
    }

    /// Drain pending faults as one aggregate error
    pub fn take(&self) -> Option<TransportError> {
        let mut errors = self.inner.errors.lock();
        if errors.is_empty() {
            return None;
        }
        let drained: Vec<TransportError> = errors.drain(..).collect();
        self.inner.pending.send_replace(false);
        Some(TransportError::SocketTransport { errors: drained })
    }

    /// Forget pending faults without replaying them
    pub fn clear(&self) {
        self.inner.errors.lock().clear();
        self.inner.pending.send_replace(false);
    }
}

impl Default for ExceptionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_post() {
        let monitor = ExceptionMonitor::new();
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        monitor.post(TransportError::invalid_message("bad reply"));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_is_level_triggered() {
        let monitor = ExceptionMonitor::new();
        monitor.post(TransportError::NotConnected);
        // Subscribing after the post still observes it
        tokio::time::timeout(Duration::from_millis(100), monitor.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_take_aggregates_and_resets() {
        let monitor = ExceptionMonitor::new();
        assert!(monitor.take().is_none());

        monitor.post(TransportError::invalid_message("first"));
        monitor.post(TransportError::handler("second"));
        assert!(monitor.has_exception());

        match monitor.take() {
            Some(TransportError::SocketTransport { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!monitor.has_exception());
        assert!(monitor.take().is_none());
    }

    #[test]
    fn test_clear_discards() {
        let monitor = ExceptionMonitor::new();
        monitor.post(TransportError::NotConnected);
        monitor.clear();
        assert!(!monitor.has_exception());
    }
}
