//! In-process transport delivering pushes straight to a `PushListener`.

use async_trait::async_trait;
use relay_listener::{PushAdapter, PushListener};
use relay_protocol::{PushInput, PushOutput};
use relay_pusher::{PushTransport, PusherError, PusherResult};
use std::sync::Arc;

/// Connects a pusher to a listener without HTTP.
///
/// Listener errors are mapped the way the HTTP endpoint maps them: server
/// errors are retryable, client errors are protocol errors.
pub struct ListenerTransport<A: PushAdapter> {
    listener: Arc<PushListener<A>>,
}

impl<A: PushAdapter + 'static> ListenerTransport<A> {
    /// Creates a transport delivering to `listener`.
    pub fn new(listener: Arc<PushListener<A>>) -> Self {
        Self { listener }
    }

    /// The listener pushes are delivered to.
    pub fn listener(&self) -> &Arc<PushListener<A>> {
        &self.listener
    }
}

#[async_trait]
impl<A: PushAdapter + 'static> PushTransport for ListenerTransport<A> {
    async fn push(&self, input: &PushInput) -> PusherResult<PushOutput> {
        let listener = Arc::clone(&self.listener);
        let input = input.clone();

        let outcome = tokio::task::spawn_blocking(move || listener.push(&input))
            .await
            .map_err(|e| PusherError::Internal(format!("listener task failed: {}", e)))?;

        outcome.map_err(|err| {
            if err.is_client_error() {
                PusherError::Protocol(err.to_string())
            } else {
                PusherError::transport_retryable(err.to_string())
            }
        })
    }
}
