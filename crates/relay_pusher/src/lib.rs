//! # Relay Pusher
//!
//! Source side of push replication.
//!
//! This crate provides:
//! - `Pusher`, the per-subscription scheduler keeping every stream's
//!   receiver position converging on the source head
//! - The worker cycle (resolve, read, push, follow corrections)
//! - `Reader`, `PushTransport` and `PubSubClient` seams, with `MemoryLog`,
//!   `HttpTransport` (reqwest) and `ChannelPubSub` implementations
//!
//! # Streams
//!
//! The pusher starts from the subscription stream
//! (`/_subscriptions/<id>`). Pushing it makes the receiver report the
//! streams it lags behind on, which are added to the stream table and
//! pushed in turn. Writer notifications only wake streams up; all
//! positions come from the receiver.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod error;
mod http;
mod pubsub;
mod pusher;
mod reader;
mod status;
mod transport;
mod worker;

pub use config::PusherConfig;
pub use error::{PusherError, PusherResult};
pub use http::HttpTransport;
pub use pubsub::{ChannelPubSub, NotificationStream, PubSubClient};
pub use pusher::{Pusher, PusherHandle};
pub use reader::{MemoryLog, Reader};
pub use status::{merge_cursor, MergeOutcome, StreamStatus, StreamTable, StreamUpdate};
pub use transport::{MockTransport, PushTransport};
pub use worker::{WorkRequest, WorkResult};
