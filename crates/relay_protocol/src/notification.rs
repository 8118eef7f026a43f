//! Pub/sub wake-up notifications and subscription naming.
//!
//! The pub/sub transport delivers messages as vectors of strings. A message
//! whose first field is `NOTIFY` announces that the stream named by the
//! serialized cursor in the third field has advanced:
//!
//! ```text
//! ["NOTIFY", "sub:<subscription>", "/tenants/foo:0:512:10.0.0.7"]
//! ```
//!
//! Notifications are best-effort hints. Losing one only delays replication
//! until the next poll.

use crate::cursor::{Cursor, CursorParseError};
use thiserror::Error;

/// First field of a cursor-advance message.
pub const NOTIFY: &str = "NOTIFY";

/// Errors decoding a pub/sub message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// NOTIFY without topic and payload.
    #[error("NOTIFY message has {0} fields, expected 3")]
    WrongArity(usize),

    /// The payload is not a cursor.
    #[error("NOTIFY payload: {0}")]
    Cursor(#[from] CursorParseError),
}

/// A decoded cursor-advance event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Topic the message was published on.
    pub topic: String,
    /// Newest known cursor of the stream.
    pub cursor: Cursor,
}

impl Notification {
    /// Creates a notification.
    pub fn new(topic: impl Into<String>, cursor: Cursor) -> Self {
        Self {
            topic: topic.into(),
            cursor,
        }
    }

    /// Decodes a raw message.
    ///
    /// Returns `Ok(None)` for message kinds other than NOTIFY.
    pub fn decode(message: &[String]) -> Result<Option<Self>, NotificationError> {
        match message.first().map(String::as_str) {
            Some(NOTIFY) => {}
            _ => return Ok(None),
        }

        if message.len() != 3 {
            return Err(NotificationError::WrongArity(message.len()));
        }

        let cursor = Cursor::parse(&message[2])?;
        Ok(Some(Self::new(message[1].clone(), cursor)))
    }

    /// Encodes into the raw message form.
    pub fn encode(&self) -> Vec<String> {
        vec![NOTIFY.to_string(), self.topic.clone(), self.cursor.serialize()]
    }
}

/// Pub/sub topic carrying activity for a subscription.
pub fn subscription_topic(subscription_id: &str) -> String {
    format!("sub:{}", subscription_id)
}

/// Stream recording activity of the streams a subscription follows.
pub fn subscription_stream(subscription_id: &str) -> String {
    format!("/_subscriptions/{}", subscription_id)
}
