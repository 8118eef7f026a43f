//! Test fixtures wiring a source log to a receiver.
//!
//! A `SubscriptionFixture` owns both ends of one subscription: the writer's
//! `MemoryLog` with its pub/sub, and a `PushListener` over a `MemoryAdapter`.

use crate::listener_transport::ListenerTransport;
use relay_listener::{ListenerConfig, MemoryAdapter, PushListener};
use relay_protocol::{subscription_stream, Cursor};
use relay_pusher::{ChannelPubSub, MemoryLog, PusherConfig};
use std::sync::Arc;
use std::time::Duration;

/// Both ends of one subscription.
pub struct SubscriptionFixture {
    /// Random subscription id.
    pub subscription_id: String,
    /// Writer-side pub/sub.
    pub pubsub: Arc<ChannelPubSub>,
    /// Writer-side log.
    pub log: Arc<MemoryLog>,
    /// Receiver-side storage.
    pub adapter: Arc<MemoryAdapter>,
    /// Receiver.
    pub listener: Arc<PushListener<MemoryAdapter>>,
}

impl SubscriptionFixture {
    /// Creates a fixture whose log reads 10 lines at a time.
    pub fn new() -> Self {
        Self::with_batch_size(10)
    }

    /// Creates a fixture whose log reads `batch_size` lines at a time.
    pub fn with_batch_size(batch_size: usize) -> Self {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
        let pubsub = Arc::new(ChannelPubSub::new());
        let log = Arc::new(
            MemoryLog::new("writer-1")
                .with_batch_size(batch_size)
                .with_pubsub(Arc::clone(&pubsub)),
        );
        let adapter = Arc::new(MemoryAdapter::new());
        let listener = Arc::new(PushListener::new(
            ListenerConfig::new(subscription_id.as_str()),
            Arc::clone(&adapter),
        ));

        Self {
            subscription_id,
            pubsub,
            log,
            adapter,
            listener,
        }
    }

    /// Pusher configuration with short backoffs.
    pub fn pusher_config(&self) -> PusherConfig {
        PusherConfig::new(self.subscription_id.as_str(), "mem://listener")
            .with_error_backoff(Duration::from_millis(5))
            .with_throttle_backoff(Duration::from_millis(10))
            .with_request_timeout(Duration::from_secs(5))
    }

    /// In-process transport to this fixture's listener.
    pub fn listener_transport(&self) -> ListenerTransport<MemoryAdapter> {
        ListenerTransport::new(Arc::clone(&self.listener))
    }

    /// Appends `events` to `stream`, subscribing to it first.
    ///
    /// Returns the cursor after the last event.
    ///
    /// # Panics
    ///
    /// Panics if `stream` cannot appear in a cursor.
    pub fn append(&self, stream: &str, events: &[&str]) -> Cursor {
        self.log
            .follow(&self.subscription_id, stream)
            .expect("Failed to follow stream");
        let mut last = self.log.head(stream);
        for event in events {
            last = self
                .log
                .append(stream, *event)
                .expect("Failed to append event");
        }
        last
    }

    /// Returns true once the receiver stores the writer's head for every
    /// stream in `streams` and for the subscription stream.
    pub fn is_replicated(&self, streams: &[&str]) -> bool {
        let subscription = subscription_stream(&self.subscription_id);
        streams
            .iter()
            .copied()
            .chain(std::iter::once(subscription.as_str()))
            .all(|stream| {
                self.adapter
                    .offset(stream)
                    .is_some_and(|stored| stored.position_equals(&self.log.head(stream)))
            })
    }

    /// Polls until `is_replicated(streams)` holds. Returns false on timeout.
    pub async fn wait_replicated(&self, streams: &[&str], timeout: Duration) -> bool {
        let poll = async {
            while !self.is_replicated(streams) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

impl Default for SubscriptionFixture {
    fn default() -> Self {
        Self::new()
    }
}
