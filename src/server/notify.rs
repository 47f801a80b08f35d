//! Fan-out of change notifications to connected sockets.

use tokio::sync::broadcast;

use crate::models::{Meal, PushAction, PushEnvelope};

/// A serialized push message and the user it belongs to.
#[derive(Debug, Clone)]
pub struct Notification {
    pub user_id: i64,
    pub text: String,
}

/// Tracks every connected socket for broadcasting changes.
#[derive(Debug)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        // Slow sockets lag past 64 messages and skip ahead.
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Broadcasts a change. The entity carries its etag inline.
    pub fn publish(&self, action: PushAction, user_id: i64, meal: &Meal) {
        let envelope = PushEnvelope::new(action, user_id, meal.payload_with_etag());
        match serde_json::to_string(&envelope) {
            Ok(text) => {
                // Ignore send errors (no subscribers)
                let _ = self.sender.send(Notification { user_id, text });
            }
            Err(e) => tracing::warn!("Failed to encode notification: {}", e),
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
