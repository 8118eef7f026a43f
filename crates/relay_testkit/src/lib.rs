//! # Relay Testkit
//!
//! Test utilities for relay.
//!
//! This crate provides:
//! - `SubscriptionFixture`, wiring a `MemoryLog` to a `PushListener`
//! - `ListenerTransport`, an in-process transport to a listener
//! - `FailureInjectingTransport`, dropping pushes or their answers on a
//!   fixed schedule
//! - Property-based test generators using proptest
//! - `init_test_tracing` for captured log output, `capture_logs` for
//!   asserting on it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn replicates() {
//!     let fixture = SubscriptionFixture::new();
//!     fixture.append("/orders", &["created"]);
//!     // ... run a pusher against fixture.listener_transport()
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod failure;
pub mod fixtures;
pub mod generators;
pub mod listener_transport;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::failure::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::listener_transport::*;
    pub use crate::logging::*;
}

pub use failure::*;
pub use fixtures::*;
pub use generators::*;
pub use listener_transport::*;
pub use logging::*;
