//! Failure injection for transports.
//!
//! Wraps another transport and fails most pushes, letting only every Nth
//! one through. Used to check that replication converges to the same state
//! no matter how often the network drops requests or responses.

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_protocol::{PushInput, PushOutput};
use relay_pusher::{PushTransport, PusherError, PusherResult};

/// Where an injected failure happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// The push never reaches the receiver.
    BeforeDelivery,
    /// The receiver handles the push but its answer is lost.
    AfterDelivery,
}

/// A transport that fails pushes on a fixed schedule.
pub struct FailureInjectingTransport<T> {
    inner: T,
    every: u64,
    point: FailurePoint,
    state: Mutex<FailureState>,
}

#[derive(Debug, Default)]
struct FailureState {
    counter: u64,
    injected: u64,
    delivered: u64,
}

impl<T: PushTransport> FailureInjectingTransport<T> {
    /// Lets every 4th push through; the first one fails.
    pub fn new(inner: T) -> Self {
        Self::every(inner, 4)
    }

    /// Lets every `every`th push through.
    pub fn every(inner: T, every: u64) -> Self {
        Self {
            inner,
            every: every.max(1),
            point: FailurePoint::BeforeDelivery,
            state: Mutex::new(FailureState {
                counter: 1,
                ..Default::default()
            }),
        }
    }

    /// Sets where failures happen.
    pub fn at(mut self, point: FailurePoint) -> Self {
        self.point = point;
        self
    }

    /// Number of failures injected so far.
    pub fn injected(&self) -> u64 {
        self.state.lock().injected
    }

    /// Number of pushes that reached the receiver.
    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn should_fail(&self) -> Option<u64> {
        let mut state = self.state.lock();
        let counter = state.counter;
        state.counter += 1;
        if counter % self.every == 0 {
            None
        } else {
            state.injected += 1;
            Some(counter)
        }
    }
}

#[async_trait]
impl<T: PushTransport> PushTransport for FailureInjectingTransport<T> {
    async fn push(&self, input: &PushInput) -> PusherResult<PushOutput> {
        let failure = self.should_fail();

        if let (Some(counter), FailurePoint::BeforeDelivery) = (failure, self.point) {
            return Err(PusherError::transport_retryable(format!(
                "synthetic failure {}",
                counter
            )));
        }

        let output = self.inner.push(input).await;
        self.state.lock().delivered += 1;

        match failure {
            Some(counter) => Err(PusherError::transport_retryable(format!(
                "synthetic lost response {}",
                counter
            ))),
            None => output,
        }
    }
}
