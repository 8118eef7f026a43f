//! Per-stream bookkeeping of the scheduler.
//!
//! The table is owned by the scheduler task. Workers only ever see a copy
//! of one stream's status and report back with `StreamUpdate`s, which are
//! merged here under a monotonic rule: a cursor is replaced only by one
//! strictly ahead of it on the same stream.

use relay_protocol::Cursor;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Scheduler-side state of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatus {
    /// Stream name.
    pub stream: String,
    /// Whether a worker should be dispatched for this stream.
    pub should_run: bool,
    /// Whether a worker is in flight for this stream.
    pub is_running: bool,
    /// Latest position known to be stored by the receiver.
    ///
    /// `None` until the receiver has been asked.
    pub target_acked: Option<Cursor>,
    /// Largest position the writer is known to have reached. Advisory.
    pub writer_largest: Option<Cursor>,
    /// Delay the next worker waits before doing anything.
    pub backoff: Duration,
    /// Set when the stream is woken while its worker is in flight.
    pub rerun_requested: bool,
    /// Set once the stream hit a fatal error. Failed streams never run again.
    pub failed: Option<String>,
}

impl StreamStatus {
    /// Creates the status of a newly discovered stream.
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            should_run: true,
            is_running: false,
            target_acked: None,
            writer_largest: None,
            backoff: Duration::ZERO,
            rerun_requested: false,
            failed: None,
        }
    }

    /// Returns true if a worker may be dispatched now.
    pub fn is_runnable(&self) -> bool {
        self.should_run && !self.is_running && self.failed.is_none()
    }

    /// Requests another worker cycle.
    ///
    /// A wake-up that arrives while a worker is in flight is remembered, so
    /// the stream runs again even if that worker reports it caught up.
    pub fn wake(&mut self) {
        if self.is_running {
            self.rerun_requested = true;
        } else {
            self.should_run = true;
        }
    }
}

/// A worker's report about one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpdate {
    /// Stream the update is about.
    pub stream: String,
    /// Reported receiver position.
    pub target_acked: Option<Cursor>,
    /// Reported writer position.
    pub writer_largest: Option<Cursor>,
    /// The receiver reported this stream as lagging behind subscription
    /// activity. Such a stream runs again even if the position is known.
    pub behind: bool,
}

impl StreamUpdate {
    /// An update of the receiver position to `cursor`.
    pub fn acked(cursor: Cursor) -> Self {
        Self {
            stream: cursor.stream().to_string(),
            target_acked: Some(cursor),
            writer_largest: None,
            behind: false,
        }
    }

    /// A receiver position reported as lagging behind subscription activity.
    pub fn behind(cursor: Cursor) -> Self {
        Self {
            behind: true,
            ..Self::acked(cursor)
        }
    }

    /// An update of the writer position to `cursor`.
    pub fn writer_head(cursor: Cursor) -> Self {
        Self {
            stream: cursor.stream().to_string(),
            target_acked: None,
            writer_largest: Some(cursor),
            behind: false,
        }
    }

    /// Adds a writer position to this update.
    pub fn with_writer_largest(mut self, cursor: Option<Cursor>) -> Self {
        self.writer_largest = cursor;
        self
    }
}

/// What merging one reported cursor did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing was known; the reported cursor was stored.
    Initialized,
    /// The reported cursor was ahead and replaced the known one.
    Advanced,
    /// The reported cursor was not ahead and was dropped.
    NoMovement,
}

/// Merges `reported` into `slot` under the monotonic rule.
pub fn merge_cursor(slot: &mut Option<Cursor>, reported: Cursor) -> MergeOutcome {
    match slot {
        None => {
            *slot = Some(reported);
            MergeOutcome::Initialized
        }
        Some(known) if reported.is_ahead_of(known) => {
            *known = reported;
            MergeOutcome::Advanced
        }
        Some(_) => MergeOutcome::NoMovement,
    }
}

/// All streams known to one pusher, keyed by name.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: BTreeMap<String, StreamStatus>,
}

impl StreamTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status of `stream`, creating it if unknown.
    pub fn ensure(&mut self, stream: &str) -> &mut StreamStatus {
        self.streams
            .entry(stream.to_string())
            .or_insert_with(|| {
                debug!(stream, "discovered stream");
                StreamStatus::new(stream)
            })
    }

    /// Status of `stream`.
    pub fn get(&self, stream: &str) -> Option<&StreamStatus> {
        self.streams.get(stream)
    }

    /// Mutable status of `stream`.
    pub fn get_mut(&mut self, stream: &str) -> Option<&mut StreamStatus> {
        self.streams.get_mut(stream)
    }

    /// Number of known streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns true if no stream is known.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Number of streams with a worker in flight.
    pub fn running_count(&self) -> usize {
        self.streams.values().filter(|s| s.is_running).count()
    }

    /// Names of the streams a worker may be dispatched for, in name order.
    pub fn runnable(&self) -> Vec<String> {
        self.streams
            .values()
            .filter(|s| s.is_runnable())
            .map(|s| s.stream.clone())
            .collect()
    }

    /// Runnable streams in name order, starting after `last` and wrapping
    /// around, so that dispatch rotates through the table.
    pub fn runnable_after(&self, last: Option<&str>) -> Vec<String> {
        let mut runnable = self.runnable();
        if let Some(last) = last {
            let split = runnable.partition_point(|stream| stream.as_str() <= last);
            runnable.rotate_left(split);
        }
        runnable
    }

    /// Merges a worker's report.
    ///
    /// Forward movement of the receiver position wakes the stream, and so
    /// does a behind report. Reports that would move a cursor backwards are
    /// dropped.
    pub fn merge(&mut self, update: StreamUpdate) {
        let status = self.ensure(&update.stream);

        if let Some(reported) = update.target_acked {
            let offset = reported.offset_string();
            match merge_cursor(&mut status.target_acked, reported) {
                MergeOutcome::Initialized => {
                    info!(stream = %status.stream, offset = %offset, "initialized receiver position");
                }
                MergeOutcome::Advanced => {
                    info!(stream = %status.stream, offset = %offset, "receiver moved forward");
                    status.wake();
                }
                MergeOutcome::NoMovement => {
                    debug!(stream = %status.stream, offset = %offset, "no movement");
                }
            }
        }

        if let Some(reported) = update.writer_largest {
            merge_cursor(&mut status.writer_largest, reported);
        }

        if update.behind {
            status.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(offset: i64) -> Cursor {
        Cursor::new("/s", 0, offset, "w1")
    }

    #[test]
    fn merge_initializes_then_only_advances() {
        let mut slot = None;
        assert_eq!(merge_cursor(&mut slot, at(5)), MergeOutcome::Initialized);
        assert_eq!(merge_cursor(&mut slot, at(3)), MergeOutcome::NoMovement);
        assert_eq!(merge_cursor(&mut slot, at(5)), MergeOutcome::NoMovement);
        assert_eq!(merge_cursor(&mut slot, at(9)), MergeOutcome::Advanced);
        assert_eq!(slot, Some(at(9)));
    }

    #[test]
    fn merge_ignores_other_streams() {
        let mut slot = Some(at(5));
        let other = Cursor::new("/other", 7, 0, "w1");
        assert_eq!(merge_cursor(&mut slot, other), MergeOutcome::NoMovement);
        assert_eq!(slot, Some(at(5)));
    }

    #[test]
    fn new_streams_are_runnable() {
        let mut table = StreamTable::new();
        table.merge(StreamUpdate::acked(Cursor::beginning_of_stream("/x", "?")));

        let status = table.get("/x").unwrap();
        assert!(status.is_runnable());
        assert_eq!(status.target_acked, Some(Cursor::beginning_of_stream("/x", "?")));
        assert_eq!(table.runnable(), vec!["/x".to_string()]);
    }

    #[test]
    fn runnable_streams_rotate() {
        let mut table = StreamTable::new();
        for stream in ["/a", "/b", "/c", "/d"] {
            table.ensure(stream);
        }
        table.get_mut("/c").unwrap().is_running = true;

        assert_eq!(table.runnable_after(None), vec!["/a", "/b", "/d"]);
        assert_eq!(table.runnable_after(Some("/b")), vec!["/d", "/a", "/b"]);
        assert_eq!(table.runnable_after(Some("/c")), vec!["/d", "/a", "/b"]);
        assert_eq!(table.runnable_after(Some("/d")), vec!["/a", "/b", "/d"]);
        assert_eq!(table.runnable_after(Some("/zzz")), vec!["/a", "/b", "/d"]);
    }

    #[test]
    fn forward_progress_wakes_idle_stream() {
        let mut table = StreamTable::new();
        table.merge(StreamUpdate::acked(at(2)));
        table.get_mut("/s").unwrap().should_run = false;

        table.merge(StreamUpdate::acked(at(1)));
        assert!(!table.get("/s").unwrap().should_run);

        table.merge(StreamUpdate::acked(at(4)));
        assert!(table.get("/s").unwrap().should_run);
    }

    #[test]
    fn wake_while_running_is_remembered() {
        let mut table = StreamTable::new();
        let status = table.ensure("/s");
        status.should_run = false;
        status.is_running = true;

        table.merge(StreamUpdate::acked(at(1)));
        table.merge(StreamUpdate::acked(at(2)));

        let status = table.get("/s").unwrap();
        assert!(status.rerun_requested);
        assert!(!status.is_runnable());
        assert_eq!(table.running_count(), 1);
    }

    #[test]
    fn behind_report_wakes_caught_up_stream() {
        let mut table = StreamTable::new();
        table.merge(StreamUpdate::acked(at(3)));
        table.get_mut("/s").unwrap().should_run = false;

        // Same position as known: no movement, but the stream must run.
        table.merge(StreamUpdate::behind(at(3)));

        let status = table.get("/s").unwrap();
        assert_eq!(status.target_acked, Some(at(3)));
        assert!(status.should_run);
    }

    #[test]
    fn failed_streams_never_run() {
        let mut table = StreamTable::new();
        table.ensure("/s").failed = Some("protocol error".into());
        table.merge(StreamUpdate::acked(at(1)));
        table.merge(StreamUpdate::acked(at(2)));

        assert!(table.runnable().is_empty());
    }

    #[test]
    fn writer_largest_is_tracked_monotonically() {
        let mut table = StreamTable::new();
        table.merge(StreamUpdate::writer_head(at(10)));
        table.merge(StreamUpdate::writer_head(at(4)));

        let status = table.get("/s").unwrap();
        assert_eq!(status.writer_largest, Some(at(10)));
        assert_eq!(status.target_acked, None);
    }

    proptest! {
        #[test]
        fn merged_cursor_never_regresses(
            reports in prop::collection::vec((0i64..4, 0i64..50), 1..40)
        ) {
            let mut table = StreamTable::new();
            let mut previous: Option<Cursor> = None;

            for (chunk, offset) in reports {
                table.merge(StreamUpdate::acked(Cursor::new("/s", chunk, offset, "w1")));
                let current = table.get("/s").and_then(|s| s.target_acked.clone());

                if let (Some(before), Some(after)) = (&previous, &current) {
                    prop_assert!(!before.is_ahead_of(after));
                }
                previous = current;
            }
        }
    }
}
