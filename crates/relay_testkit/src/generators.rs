//! Property-based test generators using proptest.
//!
//! Provides strategies for generating cursors, read batches and event
//! contents that respect the cursor format.

use proptest::prelude::*;
use relay_protocol::{Cursor, Position, ReadLine, ReadResult};

/// Strategy for stream names: slash-separated, never empty.
pub fn stream_name_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9_-]{0,11}", 1..4).prop_map(|parts| format!("/{}", parts.join("/")))
}

/// Strategy for server names, including names containing `:`.
pub fn server_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(relay_protocol::UNKNOWN_SERVER.to_string()),
        "[a-z][a-z0-9-]{0,15}",
        "[a-z][a-z0-9-]{0,15}:[0-9]{2,5}",
    ]
}

/// Strategy for valid, non-sentinel positions.
pub fn position_strategy() -> impl Strategy<Value = Position> {
    (0i64..1_000, 0i64..1_000_000).prop_map(|(chunk, offset)| Position::new(chunk, offset))
}

/// Strategy for valid cursors.
pub fn cursor_strategy() -> impl Strategy<Value = Cursor> {
    (stream_name_strategy(), position_strategy(), server_strategy()).prop_map(
        |(stream, position, server)| Cursor::new(stream, position.chunk, position.offset, server),
    )
}

/// Strategy for event contents.
pub fn event_content_strategy() -> impl Strategy<Value = String> {
    "[ -~]{0,64}"
}

/// Strategy for a batch of content lines on `stream`, starting at the
/// beginning of the stream.
pub fn content_batch_strategy(stream: &'static str) -> impl Strategy<Value = ReadResult> {
    prop::collection::vec(event_content_strategy(), 0..32).prop_map(move |contents| {
        let from = Cursor::beginning_of_stream(stream, "w1");
        let lines = contents
            .into_iter()
            .enumerate()
            .map(|(i, content)| ReadLine::content(content, from.with_position(0, i as i64 + 1)))
            .collect();
        ReadResult::new(from, lines)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_cursors_roundtrip(cursor in cursor_strategy()) {
            let parsed = Cursor::parse(&cursor.serialize()).unwrap();
            prop_assert_eq!(parsed, cursor);
        }

        #[test]
        fn batches_are_ordered(batch in content_batch_strategy("/s")) {
            let mut previous = batch.from_offset.clone();
            for line in &batch.lines {
                prop_assert!(line.ptr_after().is_ahead_of(&previous));
                previous = line.ptr_after().clone();
            }
        }
    }
}
