//! Stream positions.
//!
//! A [`Cursor`] names a point in one stream of the source log: the stream,
//! the chunk and byte offset inside it, and the server the position was
//! observed on. Cursors are totally ordered only within a single stream.
//!
//! ## Serialized form
//!
//! ```text
//! /tenants/foo:3:1024:10.0.0.7
//! ^stream      ^chunk ^offset ^server
//! ```
//!
//! The server part is everything after the third `:`, so `host:port`
//! servers survive a round trip.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Server name used when the origin of a position is not known.
pub const UNKNOWN_SERVER: &str = "?";

/// Chunk and offset value of the offset-query sentinel.
const OFFSET_QUERY_MARKER: i64 = -1;

/// Errors produced when parsing a serialized cursor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorParseError {
    /// Fewer than four `:`-separated parts.
    #[error("cursor {0:?}: expected <stream>:<chunk>:<offset>:<server>")]
    MissingParts(String),

    /// Empty stream name.
    #[error("cursor {0:?}: empty stream name")]
    EmptyStream(String),

    /// Stream name containing `:`, which would not survive a round trip.
    #[error("cursor {0:?}: stream name contains ':'")]
    InvalidStream(String),

    /// Empty server name.
    #[error("cursor {0:?}: empty server name")]
    EmptyServer(String),

    /// Chunk or offset is not an integer.
    #[error("cursor {input:?}: invalid {field}")]
    InvalidNumber {
        /// The full input.
        input: String,
        /// Which field failed (`chunk` or `offset`).
        field: &'static str,
    },

    /// Negative position that is not the offset-query sentinel.
    #[error("cursor {0:?}: negative position")]
    NegativePosition(String),
}

/// Position inside a stream, ordered by chunk then offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    /// Chunk number.
    pub chunk: i64,
    /// Byte offset inside the chunk.
    pub offset: i64,
}

impl Position {
    /// Creates a position.
    pub const fn new(chunk: i64, offset: i64) -> Self {
        Self { chunk, offset }
    }

    /// The first position of every stream.
    pub const fn beginning() -> Self {
        Self::new(0, 0)
    }

    const fn offset_query() -> Self {
        Self::new(OFFSET_QUERY_MARKER, OFFSET_QUERY_MARKER)
    }
}

/// An immutable position marker in a named stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    stream: String,
    position: Position,
    server: String,
}

impl Cursor {
    /// Creates a cursor from parts the caller knows to be valid.
    ///
    /// Use [`Cursor::try_new`] for names that come from outside.
    pub fn new(
        stream: impl Into<String>,
        chunk: i64,
        offset: i64,
        server: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            position: Position::new(chunk, offset),
            server: server.into(),
        }
    }

    /// Creates a cursor, applying the same rules as [`Cursor::parse`].
    pub fn try_new(
        stream: impl Into<String>,
        chunk: i64,
        offset: i64,
        server: impl Into<String>,
    ) -> Result<Self, CursorParseError> {
        let cursor = Self::new(stream, chunk, offset, server);
        check_stream_name(&cursor.stream)?;
        if cursor.server.is_empty() {
            return Err(CursorParseError::EmptyServer(cursor.to_string()));
        }
        if (chunk < 0 || offset < 0) && cursor.position != Position::offset_query() {
            return Err(CursorParseError::NegativePosition(cursor.to_string()));
        }
        Ok(cursor)
    }

    /// The first position of `stream`.
    pub fn beginning_of_stream(stream: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            position: Position::beginning(),
            server: server.into(),
        }
    }

    /// A sentinel used to ask a receiver where it stands on `stream`.
    ///
    /// No receiver ever stores this position, so pushing from it always
    /// yields `IncorrectBaseOffset` carrying the receiver's real position.
    pub fn for_offset_query(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            position: Position::offset_query(),
            server: UNKNOWN_SERVER.to_string(),
        }
    }

    /// Parses the serialized form.
    pub fn parse(input: &str) -> Result<Self, CursorParseError> {
        let mut parts = input.splitn(4, ':');
        let (Some(stream), Some(chunk), Some(offset), Some(server)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CursorParseError::MissingParts(input.to_string()));
        };

        if stream.is_empty() {
            return Err(CursorParseError::EmptyStream(input.to_string()));
        }
        if server.is_empty() {
            return Err(CursorParseError::EmptyServer(input.to_string()));
        }

        let chunk: i64 = chunk.parse().map_err(|_| CursorParseError::InvalidNumber {
            input: input.to_string(),
            field: "chunk",
        })?;
        let offset: i64 = offset.parse().map_err(|_| CursorParseError::InvalidNumber {
            input: input.to_string(),
            field: "offset",
        })?;

        let position = Position::new(chunk, offset);
        if (chunk < 0 || offset < 0) && position != Position::offset_query() {
            return Err(CursorParseError::NegativePosition(input.to_string()));
        }

        Ok(Self {
            stream: stream.to_string(),
            position,
            server: server.to_string(),
        })
    }

    /// Returns the serialized form.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// The stream this cursor points into.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// The server the position was observed on.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The position inside the stream.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Returns true for the offset-query sentinel.
    pub fn is_offset_query(&self) -> bool {
        self.position == Position::offset_query()
    }

    /// Same stream and same position. The server is not compared.
    pub fn position_equals(&self, other: &Cursor) -> bool {
        self.stream == other.stream && self.position == other.position
    }

    /// Strictly ahead of `other` within the same stream.
    ///
    /// Cursors of different streams are not comparable; this returns false.
    pub fn is_ahead_of(&self, other: &Cursor) -> bool {
        self.compare_position(other) == Some(Ordering::Greater)
    }

    /// Orders two cursors of the same stream, `None` across streams.
    pub fn compare_position(&self, other: &Cursor) -> Option<Ordering> {
        if self.stream != other.stream {
            return None;
        }
        Some(self.position.cmp(&other.position))
    }

    /// `<chunk>:<offset>`, for log lines.
    pub fn offset_string(&self) -> String {
        format!("{}:{}", self.position.chunk, self.position.offset)
    }

    /// A cursor in the same stream at another position.
    pub fn with_position(&self, chunk: i64, offset: i64) -> Self {
        Self {
            stream: self.stream.clone(),
            position: Position::new(chunk, offset),
            server: self.server.clone(),
        }
    }
}

/// Checks that `stream` can be used in a cursor.
pub fn check_stream_name(stream: &str) -> Result<(), CursorParseError> {
    if stream.is_empty() {
        return Err(CursorParseError::EmptyStream(stream.to_string()));
    }
    if stream.contains(':') {
        return Err(CursorParseError::InvalidStream(stream.to_string()));
    }
    Ok(())
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.stream, self.position.chunk, self.position.offset, self.server
        )
    }
}

impl FromStr for Cursor {
    type Err = CursorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Cursor::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn serialize_format() {
        let cursor = Cursor::new("/tenants/foo", 3, 1024, "10.0.0.7");
        assert_eq!(cursor.serialize(), "/tenants/foo:3:1024:10.0.0.7");
        assert_eq!(cursor.offset_string(), "3:1024");
    }

    #[test]
    fn parse_server_with_port() {
        let cursor = Cursor::parse("/s:0:10:127.0.0.1:9092").unwrap();
        assert_eq!(cursor.stream(), "/s");
        assert_eq!(cursor.position(), Position::new(0, 10));
        assert_eq!(cursor.server(), "127.0.0.1:9092");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(matches!(
            Cursor::parse("/s:0:10"),
            Err(CursorParseError::MissingParts(_))
        ));
        assert!(matches!(
            Cursor::parse(":0:10:?"),
            Err(CursorParseError::EmptyStream(_))
        ));
        assert!(matches!(
            Cursor::parse("/s:0:10:"),
            Err(CursorParseError::EmptyServer(_))
        ));
        assert!(matches!(
            Cursor::parse("/s:x:10:?"),
            Err(CursorParseError::InvalidNumber { field: "chunk", .. })
        ));
        assert!(matches!(
            Cursor::parse("/s:0:ten:?"),
            Err(CursorParseError::InvalidNumber { field: "offset", .. })
        ));
        assert!(matches!(
            Cursor::parse("/s:-1:10:?"),
            Err(CursorParseError::NegativePosition(_))
        ));
    }

    #[test]
    fn try_new_rejects_unparseable_parts() {
        assert!(matches!(
            Cursor::try_new("/a:b", 0, 1, "w1"),
            Err(CursorParseError::InvalidStream(_))
        ));
        assert!(matches!(
            Cursor::try_new("", 0, 1, "w1"),
            Err(CursorParseError::EmptyStream(_))
        ));
        assert!(matches!(
            Cursor::try_new("/a", 0, 1, ""),
            Err(CursorParseError::EmptyServer(_))
        ));
        assert!(matches!(
            Cursor::try_new("/a", 0, -4, "w1"),
            Err(CursorParseError::NegativePosition(_))
        ));

        let cursor = Cursor::try_new("/a", 2, 7, "host:9092").unwrap();
        assert_eq!(cursor, Cursor::new("/a", 2, 7, "host:9092"));
    }

    #[test]
    fn offset_query_sentinel() {
        let query = Cursor::for_offset_query("/s");
        assert!(query.is_offset_query());
        assert_eq!(query.serialize(), "/s:-1:-1:?");

        let parsed = Cursor::parse(&query.serialize()).unwrap();
        assert_eq!(parsed, query);
        assert!(!query.position_equals(&Cursor::beginning_of_stream("/s", UNKNOWN_SERVER)));
    }

    #[test]
    fn ordering_within_stream() {
        let a = Cursor::new("/s", 0, 100, "a");
        let b = Cursor::new("/s", 0, 200, "a");
        let c = Cursor::new("/s", 1, 0, "b");

        assert!(b.is_ahead_of(&a));
        assert!(c.is_ahead_of(&b));
        assert!(!a.is_ahead_of(&b));
        assert!(!a.is_ahead_of(&a));
    }

    #[test]
    fn position_equals_ignores_server() {
        let a = Cursor::new("/s", 2, 5, "a");
        let b = Cursor::new("/s", 2, 5, "b");
        assert!(a.position_equals(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn different_streams_never_compare() {
        let a = Cursor::new("/a", 9, 9, "x");
        let b = Cursor::new("/b", 0, 0, "x");
        assert!(!a.is_ahead_of(&b));
        assert!(!b.is_ahead_of(&a));
        assert!(!a.position_equals(&b));
        assert_eq!(a.compare_position(&b), None);
    }

    #[test]
    fn serde_as_string() {
        let cursor = Cursor::new("/s", 1, 2, UNKNOWN_SERVER);
        let json = serde_json::to_string(&cursor).unwrap();
        assert_eq!(json, "\"/s:1:2:?\"");

        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cursor);

        assert!(serde_json::from_str::<Cursor>("\"garbage\"").is_err());
    }

    fn cursor_strategy() -> impl Strategy<Value = Cursor> {
        (
            "/[a-z_]{1,8}(/[a-z0-9_]{1,8}){0,2}",
            0i64..1_000,
            0i64..1_000_000,
            "[a-z0-9.:?]{1,16}",
        )
            .prop_map(|(stream, chunk, offset, server)| Cursor::new(stream, chunk, offset, server))
    }

    proptest! {
        #[test]
        fn parse_serialize_roundtrip(cursor in cursor_strategy()) {
            let parsed = Cursor::parse(&cursor.serialize()).unwrap();
            prop_assert_eq!(parsed, cursor);
        }

        #[test]
        fn accepted_parts_roundtrip(
            stream in "[a-z/:]{0,8}",
            chunk in -2i64..4,
            offset in -2i64..4,
            server in "[a-z:?]{0,6}",
        ) {
            if let Ok(cursor) = Cursor::try_new(stream, chunk, offset, server) {
                prop_assert_eq!(Cursor::parse(&cursor.serialize()).unwrap(), cursor);
            }
        }

        #[test]
        fn ahead_is_antisymmetric(a in 0i64..50, b in 0i64..50, c in 0i64..50, d in 0i64..50) {
            let x = Cursor::new("/s", a, b, "?");
            let y = Cursor::new("/s", c, d, "?");
            prop_assert!(!(x.is_ahead_of(&y) && y.is_ahead_of(&x)));
            prop_assert_eq!(
                x.is_ahead_of(&y) || y.is_ahead_of(&x),
                !x.position_equals(&y)
            );
        }
    }
}
