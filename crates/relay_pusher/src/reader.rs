//! Source log access.

use crate::error::{PusherError, PusherResult};
use crate::pubsub::ChannelPubSub;
use async_trait::async_trait;
use parking_lot::RwLock;
use relay_protocol::{
    check_stream_name, subscription_stream, subscription_topic, Cursor, ReadLine, ReadResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Reads batches from the source log.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Reads the lines strictly after `from`.
    ///
    /// An empty result means `from` is the end of the stream.
    async fn read(&self, from: &Cursor) -> PusherResult<ReadResult>;
}

/// An in-memory event log.
///
/// Every stream is a single chunk: the line at index `i` ends at position
/// `(0, i + 1)`. Appending to a stream followed by a subscription also
/// appends a subscription-activity line to that subscription's stream and
/// publishes a notification for it.
#[derive(Debug)]
pub struct MemoryLog {
    server: String,
    batch_size: usize,
    streams: RwLock<HashMap<String, Vec<ReadLine>>>,
    followers: RwLock<HashMap<String, Vec<String>>>,
    pubsub: Option<Arc<ChannelPubSub>>,
}

impl MemoryLog {
    /// Default maximum number of lines per read.
    pub const DEFAULT_BATCH_SIZE: usize = 100;

    /// Creates an empty log served by `server`.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            batch_size: Self::DEFAULT_BATCH_SIZE,
            streams: RwLock::new(HashMap::new()),
            followers: RwLock::new(HashMap::new()),
            pubsub: None,
        }
    }

    /// Sets the maximum number of lines per read.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Publishes subscription notifications on `pubsub`.
    pub fn with_pubsub(mut self, pubsub: Arc<ChannelPubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Makes `subscription_id` follow `stream`.
    ///
    /// Fails if either name cannot appear in a cursor.
    pub fn follow(&self, subscription_id: &str, stream: &str) -> PusherResult<()> {
        check_stream_name(stream)?;
        check_stream_name(&subscription_stream(subscription_id))?;

        let mut followers = self.followers.write();
        let subscriptions = followers.entry(stream.to_string()).or_default();
        if !subscriptions.iter().any(|s| s == subscription_id) {
            subscriptions.push(subscription_id.to_string());
        }
        Ok(())
    }

    /// Appends an event to `stream` and returns the cursor after it.
    ///
    /// Fails without writing anything if `stream` cannot appear in a cursor.
    pub fn append(&self, stream: &str, content: impl Into<String>) -> PusherResult<Cursor> {
        let mut notifications = Vec::new();
        let cursor = {
            let mut streams = self.streams.write();
            let cursor = self.push_line(&mut streams, stream, |ptr_after| {
                ReadLine::content(content, ptr_after)
            })?;

            let followers = self.followers.read();
            for subscription in followers.get(stream).into_iter().flatten() {
                let activity = vec![cursor.clone()];
                let head = self.push_line(&mut streams, &subscription_stream(subscription), |ptr_after| {
                    ReadLine::subscription_activity(activity, ptr_after)
                })?;
                notifications.push((subscription_topic(subscription), head));
            }
            cursor
        };

        self.publish(notifications);
        Ok(cursor)
    }

    /// Appends a subscription-activity line carrying `activity`.
    pub fn append_activity(
        &self,
        subscription_id: &str,
        activity: Vec<Cursor>,
    ) -> PusherResult<Cursor> {
        let head = {
            let mut streams = self.streams.write();
            self.push_line(&mut streams, &subscription_stream(subscription_id), |ptr_after| {
                ReadLine::subscription_activity(activity, ptr_after)
            })?
        };

        self.publish(vec![(subscription_topic(subscription_id), head.clone())]);
        Ok(head)
    }

    /// Cursor after the last line of `stream`.
    pub fn head(&self, stream: &str) -> Cursor {
        let len = self.streams.read().get(stream).map_or(0, Vec::len);
        Cursor::new(stream, 0, len as i64, self.server.as_str())
    }

    /// Number of lines in `stream`.
    pub fn len(&self, stream: &str) -> usize {
        self.streams.read().get(stream).map_or(0, Vec::len)
    }

    fn push_line(
        &self,
        streams: &mut HashMap<String, Vec<ReadLine>>,
        stream: &str,
        line: impl FnOnce(Cursor) -> ReadLine,
    ) -> PusherResult<Cursor> {
        let len = streams.get(stream).map_or(0, Vec::len);
        let ptr_after = Cursor::try_new(stream, 0, len as i64 + 1, self.server.as_str())?;
        streams
            .entry(stream.to_string())
            .or_default()
            .push(line(ptr_after.clone()));
        Ok(ptr_after)
    }

    fn publish(&self, notifications: Vec<(String, Cursor)>) {
        let Some(pubsub) = &self.pubsub else {
            return;
        };
        for (topic, cursor) in notifications {
            pubsub.notify(&topic, &cursor);
        }
    }
}

#[async_trait]
impl Reader for MemoryLog {
    async fn read(&self, from: &Cursor) -> PusherResult<ReadResult> {
        if from.is_offset_query() {
            return Err(PusherError::Read(format!(
                "cannot read {} from the offset-query sentinel",
                from.stream()
            )));
        }

        let streams = self.streams.read();
        let lines = streams.get(from.stream()).map(Vec::as_slice).unwrap_or(&[]);
        let position = from.position();
        let start = usize::try_from(position.offset).unwrap_or(usize::MAX);
        if position.chunk != 0 || start > lines.len() {
            return Err(PusherError::Read(format!(
                "{} is beyond the end of the log ({} lines)",
                from,
                lines.len()
            )));
        }

        let end = lines.len().min(start.saturating_add(self.batch_size));
        debug!(stream = from.stream(), from = %from.offset_string(), lines = end - start, "read");
        Ok(ReadResult::new(from.clone(), lines[start..end].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::PubSubClient;
    use relay_protocol::Notification;

    #[tokio::test]
    async fn read_in_batches() {
        let log = MemoryLog::new("w1").with_batch_size(2);
        for event in ["a", "b", "c"] {
            log.append("/s", event).unwrap();
        }

        let first = log.read(&Cursor::beginning_of_stream("/s", "?")).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.last_ptr_after(), Some(&Cursor::new("/s", 0, 2, "w1")));

        let second = log.read(first.last_ptr_after().unwrap()).await.unwrap();
        assert_eq!(second.lines, vec![ReadLine::content("c", Cursor::new("/s", 0, 3, "w1"))]);

        let top = log.read(&log.head("/s")).await.unwrap();
        assert!(top.is_empty());
    }

    #[tokio::test]
    async fn unknown_stream_reads_empty() {
        let log = MemoryLog::new("w1");
        let result = log.read(&Cursor::beginning_of_stream("/nothing", "?")).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn read_beyond_end_fails() {
        let log = MemoryLog::new("w1");
        log.append("/s", "a").unwrap();

        let err = log.read(&Cursor::new("/s", 0, 5, "w1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(log.read(&Cursor::for_offset_query("/s")).await.is_err());
    }

    #[tokio::test]
    async fn append_fans_out_to_followers() {
        let pubsub = Arc::new(ChannelPubSub::new());
        let mut notifications = pubsub.subscribe("sub:sub-1").unwrap();
        let log = MemoryLog::new("w1").with_pubsub(Arc::clone(&pubsub));
        log.follow("sub-1", "/orders").unwrap();
        log.follow("sub-1", "/orders").unwrap();

        let cursor = log.append("/orders", "created").unwrap();
        log.append("/unfollowed", "ignored").unwrap();

        let activity = log
            .read(&Cursor::beginning_of_stream("/_subscriptions/sub-1", "?"))
            .await
            .unwrap();
        assert_eq!(
            activity.lines,
            vec![ReadLine::subscription_activity(
                vec![cursor],
                Cursor::new("/_subscriptions/sub-1", 0, 1, "w1")
            )]
        );

        let message = notifications.recv().await.unwrap();
        let notification = Notification::decode(&message).unwrap().unwrap();
        assert_eq!(notification.cursor, log.head("/_subscriptions/sub-1"));
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn explicit_activity_lines() {
        let log = MemoryLog::new("w1");
        let pointed = Cursor::new("/elsewhere", 0, 4, "w2");

        let head = log.append_activity("sub-1", vec![pointed.clone()]).unwrap();

        assert_eq!(head, log.head("/_subscriptions/sub-1"));
        let read = log
            .read(&Cursor::beginning_of_stream("/_subscriptions/sub-1", "?"))
            .await
            .unwrap();
        assert_eq!(
            read.lines,
            vec![ReadLine::subscription_activity(vec![pointed], head)]
        );
        assert!(log.append_activity("sub:1", Vec::new()).is_err());
    }

    #[test]
    fn rejects_names_that_break_cursors() {
        let log = MemoryLog::new("w1");

        let err = log.append("/a:b", "x").unwrap_err();
        assert!(matches!(err, PusherError::Cursor(_)));
        assert!(err.is_fatal());
        assert_eq!(log.len("/a:b"), 0);

        assert!(log.follow("sub-1", "/a:b").is_err());
        assert!(log.follow("sub:1", "/a").is_err());
        assert!(log.follow("sub-1", "").is_err());

        let unnamed = MemoryLog::new("");
        assert!(unnamed.append("/a", "x").is_err());
        assert_eq!(unnamed.len("/a"), 0);
    }
}
