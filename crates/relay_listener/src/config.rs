//! Listener configuration.

use std::net::SocketAddr;

/// Configuration for a push listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Subscription this receiver serves. Pushes for any other id are refused.
    pub subscription_id: String,
    /// Address to bind the HTTP endpoint to.
    pub bind_addr: SocketAddr,
    /// Maximum number of lines accepted in one push.
    pub max_push_lines: usize,
}

impl ListenerConfig {
    /// Creates a new listener configuration.
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_push_lines: 10_000,
        }
    }

    /// Sets the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the maximum number of lines per push.
    pub fn with_max_push_lines(mut self, max: usize) -> Self {
        self.max_push_lines = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ListenerConfig::new("sub-1");
        assert_eq!(config.subscription_id, "sub-1");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_push_lines, 10_000);
    }

    #[test]
    fn config_builder() {
        let config = ListenerConfig::new("sub-1")
            .with_bind_addr("0.0.0.0:9000".parse().unwrap())
            .with_max_push_lines(50);

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.max_push_lines, 50);
    }
}
