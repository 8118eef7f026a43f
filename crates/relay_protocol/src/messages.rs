//! Push request and response bodies.

use crate::cursor::Cursor;
use crate::read::ReadResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP path of the push endpoint.
pub const PUSH_PATH: &str = "/push";

/// Outcome code of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushCode {
    /// The push was validated and applied.
    Success,
    /// The push did not start from the receiver's stored offset.
    IncorrectBaseOffset,
    /// The push was addressed to another subscription.
    IncorrectSubscriptionId,
}

impl PushCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            PushCode::Success => "success",
            PushCode::IncorrectBaseOffset => "incorrect_base_offset",
            PushCode::IncorrectSubscriptionId => "incorrect_subscription_id",
        }
    }
}

impl fmt::Display for PushCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /push`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushInput {
    /// Subscription the pusher believes it is serving.
    pub subscription_id: String,
    /// The batch being pushed.
    pub read: ReadResult,
}

impl PushInput {
    /// Creates a push of `read` for `subscription_id`.
    pub fn new(subscription_id: impl Into<String>, read: ReadResult) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            read,
        }
    }

    /// A push with no lines from the offset-query sentinel of `stream`.
    ///
    /// A receiver answers it with `IncorrectBaseOffset` and its stored
    /// position for the stream.
    pub fn offset_query(subscription_id: impl Into<String>, stream: impl Into<String>) -> Self {
        Self::new(
            subscription_id,
            ReadResult::empty(Cursor::for_offset_query(stream)),
        )
    }

    /// Returns true if this push only asks for the receiver's position.
    pub fn is_offset_query(&self) -> bool {
        self.read.from_offset.is_offset_query() && self.read.lines.is_empty()
    }
}

/// Response to `POST /push`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushOutput {
    /// Selects the interpretation of the other fields.
    pub code: PushCode,
    /// `Success`: new stored offset. `IncorrectBaseOffset`: the offset the
    /// pusher must continue from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_offset: Option<Cursor>,
    /// `IncorrectSubscriptionId`: the receiver's subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_subscription_id: Option<String>,
    /// Receiver positions of streams that lag behind subscription activity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behind_cursors: Vec<Cursor>,
}

impl PushOutput {
    /// Creates a success response.
    pub fn success(accepted_offset: Cursor, behind_cursors: Vec<Cursor>) -> Self {
        Self {
            code: PushCode::Success,
            accepted_offset: Some(accepted_offset),
            correct_subscription_id: None,
            behind_cursors,
        }
    }

    /// Creates a response telling the pusher where to continue from.
    pub fn incorrect_base_offset(correct_base_offset: Cursor) -> Self {
        Self {
            code: PushCode::IncorrectBaseOffset,
            accepted_offset: Some(correct_base_offset),
            correct_subscription_id: None,
            behind_cursors: Vec::new(),
        }
    }

    /// Creates a response naming the receiver's subscription.
    pub fn incorrect_subscription_id(correct_subscription_id: impl Into<String>) -> Self {
        Self {
            code: PushCode::IncorrectSubscriptionId,
            accepted_offset: None,
            correct_subscription_id: Some(correct_subscription_id.into()),
            behind_cursors: Vec::new(),
        }
    }
}
