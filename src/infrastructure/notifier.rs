//! Best-effort notification sinks
//!
//! Notifications are fire-and-forget: delivery and cross-session ordering
//! are not guaranteed, only the per-session monotonic `seq` stamped by the
//! orchestrator. A full broadcast buffer drops events rather than blocking
//! the orchestration loop.

use tokio::sync::broadcast;

use crate::domain::events::Notification;

/// Receives orchestrator notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that only logs events through tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            "📢 [{}#{}] {:?}",
            notification.session_id,
            notification.seq,
            notification.event
        );
    }
}

/// Fan-out sink over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        // No receivers (or lagging receivers) is not an error.
        let _ = self.tx.send(notification);
    }
}
