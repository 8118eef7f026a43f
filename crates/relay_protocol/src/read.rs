//! Batches read from the source log.

use crate::cursor::Cursor;
use serde::{Deserialize, Serialize};

/// One line of a read batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum ReadLine {
    /// A regular event line.
    Content {
        /// Event payload, opaque to the protocol.
        #[serde(rename = "Content")]
        content: String,
        /// Cursor immediately after this line.
        #[serde(rename = "PtrAfter")]
        ptr_after: Cursor,
    },
    /// A meta line reporting activity on subscribed streams.
    Meta {
        /// Cursor immediately after this line.
        #[serde(rename = "PtrAfter")]
        ptr_after: Cursor,
        /// Newest known cursors of streams the subscription follows.
        #[serde(rename = "SubscriptionActivity", default)]
        subscription_activity: Vec<Cursor>,
    },
}

impl ReadLine {
    /// Creates a content line.
    pub fn content(content: impl Into<String>, ptr_after: Cursor) -> Self {
        ReadLine::Content {
            content: content.into(),
            ptr_after,
        }
    }

    /// Creates a subscription activity line.
    pub fn subscription_activity(activity: Vec<Cursor>, ptr_after: Cursor) -> Self {
        ReadLine::Meta {
            ptr_after,
            subscription_activity: activity,
        }
    }

    /// Cursor immediately after this line.
    pub fn ptr_after(&self) -> &Cursor {
        match self {
            ReadLine::Content { ptr_after, .. } | ReadLine::Meta { ptr_after, .. } => ptr_after,
        }
    }

    /// Returns true for meta lines.
    pub fn is_meta(&self) -> bool {
        matches!(self, ReadLine::Meta { .. })
    }
}

/// An ordered batch of lines following `from_offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadResult {
    /// Cursor the batch was read from. Lines start strictly after it.
    pub from_offset: Cursor,
    /// Lines in log order.
    #[serde(default)]
    pub lines: Vec<ReadLine>,
}

impl ReadResult {
    /// Creates a batch.
    pub fn new(from_offset: Cursor, lines: Vec<ReadLine>) -> Self {
        Self { from_offset, lines }
    }

    /// A batch with no lines.
    pub fn empty(from_offset: Cursor) -> Self {
        Self::new(from_offset, Vec::new())
    }

    /// Returns true if the batch has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Cursor after the last line, if any.
    pub fn last_ptr_after(&self) -> Option<&Cursor> {
        self.lines.last().map(ReadLine::ptr_after)
    }
}
