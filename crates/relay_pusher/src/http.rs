//! HTTP transport.
//!
//! Sends each push as `POST <receiver_url>/push` with a JSON body. Connection
//! failures and 5xx answers are retryable. Any other non-success status and
//! any body that does not decode as a `PushOutput` mean the receiver speaks
//! another protocol, which is fatal.

use crate::config::PusherConfig;
use crate::error::{PusherError, PusherResult};
use crate::transport::PushTransport;
use async_trait::async_trait;
use relay_protocol::{PushInput, PushOutput, PUSH_PATH};
use std::time::Duration;
use tracing::trace;

/// Pushes over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    push_url: String,
}

impl HttpTransport {
    /// Creates a transport for the receiver at `receiver_url`.
    pub fn new(receiver_url: &str, timeout: Duration) -> PusherResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PusherError::transport_fatal(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            push_url: push_url(receiver_url),
        })
    }

    /// Creates a transport from a pusher configuration.
    pub fn from_config(config: &PusherConfig) -> PusherResult<Self> {
        Self::new(&config.receiver_url, config.request_timeout)
    }

    /// URL pushes are posted to.
    pub fn push_url(&self) -> &str {
        &self.push_url
    }
}

fn push_url(receiver_url: &str) -> String {
    format!("{}{}", receiver_url.trim_end_matches('/'), PUSH_PATH)
}

#[async_trait]
impl PushTransport for HttpTransport {
    async fn push(&self, input: &PushInput) -> PusherResult<PushOutput> {
        trace!(url = %self.push_url, lines = input.read.len(), "POST push");

        let response = self
            .client
            .post(&self.push_url)
            .json(input)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    PusherError::transport_retryable(format!("push failed: {}", e))
                } else {
                    PusherError::transport_fatal(format!("push failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(PusherError::transport_retryable(format!(
                "receiver answered {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PusherError::Protocol(format!(
                "receiver answered {}: {}",
                status, body
            )));
        }

        response
            .json::<PushOutput>()
            .await
            .map_err(|e| PusherError::Protocol(format!("undecodable push response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_joins_path() {
        assert_eq!(push_url("http://10.0.0.9:8080"), "http://10.0.0.9:8080/push");
        assert_eq!(push_url("http://10.0.0.9:8080/"), "http://10.0.0.9:8080/push");

        let config = PusherConfig::new("sub-1", "http://127.0.0.1:9");
        let transport = HttpTransport::from_config(&config).unwrap();
        assert_eq!(transport.push_url(), "http://127.0.0.1:9/push");
    }

    #[tokio::test]
    async fn unreachable_receiver_is_retryable() {
        // Bind and release a port so nothing listens on it.
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        drop(socket);

        let transport = HttpTransport::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let err = transport
            .push(&PushInput::offset_query("sub-1", "/s"))
            .await
            .unwrap_err();

        assert!(err.is_retryable(), "unexpected error: {}", err);
    }
}
