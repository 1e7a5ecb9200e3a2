//! Messenger
//!
//! Topic-based publish/subscribe bus tying controllers to the port router
//! and UI bridge. Adapted from the teacher's `deposit_tracker::websocket`
//! broadcast-channel pattern (one `tokio::sync::broadcast` there per
//! connection topic; here, one channel shared by every topic with
//! consumers filtering by topic prefix) plus an epoch counter so a late
//! subscriber's snapshot replay can tell whether it missed anything.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// One published event: a dot-separated topic (`"accounts.changed"`,
/// `"approvals.attention_requested"`, `"session.locked"`) plus an opaque
/// JSON payload and the epoch it was published under.
#[derive(Debug, Clone)]
pub struct TopicEvent {
    pub topic: String,
    pub payload: serde_json::Value,
    pub epoch: u64,
}

/// Shared event bus. Cloning is cheap (`broadcast::Sender` is an `Arc`
/// internally); every controller and the port router hold a clone.
#[derive(Clone)]
pub struct Messenger {
    sender: broadcast::Sender<TopicEvent>,
    epoch: std::sync::Arc<AtomicU64>,
}

impl Messenger {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            epoch: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish on a topic, bumping the epoch counter. Dropped if there are
    /// no subscribers; that is not an error.
    pub fn publish(&self, topic: impl Into<String>, payload: serde_json::Value) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.sender.send(TopicEvent {
            topic: topic.into(),
            payload,
            epoch,
        });
        epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopicEvent> {
        self.sender.subscribe()
    }
}

impl Default for Messenger {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A subscription filtered to one topic prefix, used by call sites that
/// only care about one controller's events (e.g. the port router only
/// cares about `"accounts."`/`"session."`/`"network."`).
pub struct TopicSubscription {
    receiver: broadcast::Receiver<TopicEvent>,
    prefix: String,
}

impl TopicSubscription {
    pub fn new(messenger: &Messenger, prefix: impl Into<String>) -> Self {
        Self {
            receiver: messenger.subscribe(),
            prefix: prefix.into(),
        }
    }

    /// Await the next event matching the prefix, skipping others. Returns
    /// `None` once the channel is closed or lagged past recovery.
    pub async fn next(&mut self) -> Option<TopicEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.topic.starts_with(&self.prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_increments_epoch_and_is_observed_by_subscribers() {
        let messenger = Messenger::new(16);
        let mut sub = messenger.subscribe();

        let epoch = messenger.publish("accounts.changed", serde_json::json!({"accounts": []}));
        let event = sub.recv().await.unwrap();

        assert_eq!(event.topic, "accounts.changed");
        assert_eq!(event.epoch, epoch);
        assert_eq!(messenger.current_epoch(), epoch);
    }

    #[tokio::test]
    async fn topic_subscription_filters_by_prefix() {
        let messenger = Messenger::new(16);
        let mut sub = TopicSubscription::new(&messenger, "approvals.");

        messenger.publish("accounts.changed", serde_json::json!({}));
        messenger.publish("approvals.attention_requested", serde_json::json!({"id": "t1"}));

        let event = sub.next().await.unwrap();
        assert_eq!(event.topic, "approvals.attention_requested");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let messenger = Messenger::new(16);
        messenger.publish("session.locked", serde_json::json!({}));
    }
}
