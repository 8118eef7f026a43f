//! Configuration for the pusher.

use relay_protocol::{subscription_stream, subscription_topic};
use std::time::Duration;

/// Configuration for one subscription's pusher.
#[derive(Debug, Clone)]
pub struct PusherConfig {
    /// Subscription being replicated.
    pub subscription_id: String,
    /// Base URL of the receiver (e.g., "http://10.0.0.9:8080").
    pub receiver_url: String,
    /// Maximum number of stream workers in flight.
    pub max_worker_count: usize,
    /// Delay before retrying a stream whose cycle failed.
    pub error_backoff: Duration,
    /// Delay before retrying a stream the receiver did not advance.
    pub throttle_backoff: Duration,
    /// Timeout for each read and each push.
    pub request_timeout: Duration,
    /// Base-offset corrections followed within one worker cycle.
    pub max_base_corrections: u32,
    /// How often a caught-up subscription stream is read again, in case a
    /// notification was lost.
    pub idle_poll_interval: Duration,
}

impl PusherConfig {
    /// Creates a new pusher configuration.
    pub fn new(subscription_id: impl Into<String>, receiver_url: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            receiver_url: receiver_url.into(),
            max_worker_count: 5,
            error_backoff: Duration::from_secs(1),
            throttle_backoff: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_base_corrections: 8,
            idle_poll_interval: Duration::from_secs(5),
        }
    }

    /// Sets the worker limit.
    pub fn with_max_worker_count(mut self, count: usize) -> Self {
        self.max_worker_count = count;
        self
    }

    /// Sets the delay after a failed cycle.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Sets the delay after a push the receiver did not advance.
    pub fn with_throttle_backoff(mut self, backoff: Duration) -> Self {
        self.throttle_backoff = backoff;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the number of base-offset corrections per cycle.
    pub fn with_max_base_corrections(mut self, corrections: u32) -> Self {
        self.max_base_corrections = corrections;
        self
    }

    /// Sets the idle poll interval of the subscription stream.
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// The stream carrying this subscription's activity.
    pub fn subscription_stream(&self) -> String {
        subscription_stream(&self.subscription_id)
    }

    /// The pub/sub topic carrying this subscription's notifications.
    pub fn subscription_topic(&self) -> String {
        subscription_topic(&self.subscription_id)
    }
}
