//! Pub/sub seam for writer notifications.
//!
//! Writers publish `["NOTIFY", topic, cursor]` after appending to a stream.
//! The pusher only uses them as wake-ups, so a lost or closed subscription
//! degrades latency but never correctness.

use crate::error::PusherResult;
use parking_lot::Mutex;
use relay_protocol::{Cursor, Notification};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::trace;

/// A stream of raw pub/sub messages.
pub type NotificationStream = mpsc::UnboundedReceiver<Vec<String>>;

/// Subscribes to pub/sub topics.
pub trait PubSubClient: Send + Sync {
    /// Subscribes to `topic`.
    ///
    /// Every call returns a fresh stream, so a consumer whose stream closed
    /// may subscribe again.
    fn subscribe(&self, topic: &str) -> PusherResult<NotificationStream>;
}

/// In-process pub/sub over tokio channels.
#[derive(Debug, Default)]
pub struct ChannelPubSub {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<String>>>>>,
}

impl ChannelPubSub {
    /// Creates a pub/sub with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a raw message to every live subscriber of `topic`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish_raw(&self, topic: &str, message: Vec<String>) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(topic) else {
            return 0;
        };

        senders.retain(|sender| sender.send(message.clone()).is_ok());
        trace!(topic, subscribers = senders.len(), "published");
        senders.len()
    }

    /// Publishes a NOTIFY for `cursor` on `topic`.
    pub fn notify(&self, topic: &str, cursor: &Cursor) -> usize {
        let message = Notification::new(topic, cursor.clone()).encode();
        self.publish_raw(topic, message)
    }

    /// Number of live subscribers of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .get(topic)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl PubSubClient for ChannelPubSub {
    fn subscribe(&self, topic: &str) -> PusherResult<NotificationStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(sender);
        Ok(receiver)
    }
}
