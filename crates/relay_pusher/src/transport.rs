//! Transport abstraction for pushes.

use crate::error::{PusherError, PusherResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_protocol::{PushInput, PushOutput};
use std::collections::VecDeque;

/// Delivers pushes to a receiver.
///
/// Implemented over HTTP by `HttpTransport`; tests plug in scripted or
/// in-process receivers.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Sends one push and returns the receiver's answer.
    ///
    /// Errors must say whether they are retryable: a receiver that cannot
    /// be reached is retried, one that answers garbage is not.
    async fn push(&self, input: &PushInput) -> PusherResult<PushOutput>;
}

/// A scripted transport for testing.
///
/// Answers pushes from a queue in order and records every push it was sent.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<PusherResult<PushOutput>>>,
    sent: Mutex<Vec<PushInput>>,
}

impl MockTransport {
    /// Creates a mock transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn respond(&self, output: PushOutput) {
        self.script.lock().push_back(Ok(output));
    }

    /// Queues an error.
    pub fn fail(&self, error: PusherError) {
        self.script.lock().push_back(Err(error));
    }

    /// Pushes sent so far.
    pub fn sent(&self) -> Vec<PushInput> {
        self.sent.lock().clone()
    }

    /// Number of pushes sent so far.
    pub fn push_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn push(&self, input: &PushInput) -> PusherResult<PushOutput> {
        self.sent.lock().push(input.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(PusherError::Protocol("no scripted response".into())))
    }
}
