//! # Relay Listener
//!
//! Receiver side of push replication.
//!
//! This crate provides:
//! - `PushListener`, which validates, applies and acknowledges one push
//!   inside a single adapter transaction
//! - `PushAdapter`, the storage seam, with an explicit transaction handle
//! - `MemoryAdapter`, an in-memory reference adapter
//! - The `POST /push` HTTP endpoint (axum)
//!
//! # Protocol
//!
//! For each push the listener:
//! 1. Refuses pushes for another subscription (`IncorrectSubscriptionId`)
//! 2. Compares the push's base offset with the stored one and refuses a
//!    mismatch (`IncorrectBaseOffset`, carrying the stored offset)
//! 3. Applies content lines and collects streams found behind in
//!    subscription activity
//! 4. Stores the accepted offset and commits
//!
//! A failure anywhere rolls the transaction back, so a crash mid-push is
//! equivalent to the push never having happened.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod adapter;
mod config;
mod error;
mod http;
mod listener;
mod memory;

pub use adapter::{PushAdapter, TransactionScope};
pub use config::ListenerConfig;
pub use error::{ErrorResponse, ListenerError, ListenerResult};
pub use http::{router, serve, serve_with_shutdown};
pub use listener::PushListener;
pub use memory::{MemoryAdapter, MemoryTransaction};
