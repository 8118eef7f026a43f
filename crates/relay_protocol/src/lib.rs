//! # Relay Protocol
//!
//! Position and wire types shared by the pusher and the push listener.
//!
//! This crate provides:
//! - `Cursor`, the ordered, serializable stream position
//! - `ReadResult` batches of content and subscription-activity lines
//! - `PushInput` / `PushOutput` bodies of `POST /push`
//! - Pub/sub `Notification` decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod messages;
mod notification;
mod read;

pub use cursor::{check_stream_name, Cursor, CursorParseError, Position, UNKNOWN_SERVER};
pub use messages::{PushCode, PushInput, PushOutput, PUSH_PATH};
pub use notification::{
    subscription_stream, subscription_topic, Notification, NotificationError, NOTIFY,
};
pub use read::{ReadLine, ReadResult};
