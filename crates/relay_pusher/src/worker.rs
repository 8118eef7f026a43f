//! One stream's push cycle.
//!
//! A worker is handed a copy of a stream's status, does at most one
//! successful push, and reports what it learned. It never touches the
//! stream table.

use crate::error::{PusherError, PusherResult};
use crate::reader::Reader;
use crate::status::{StreamStatus, StreamUpdate};
use crate::transport::PushTransport;
use relay_protocol::{Cursor, PushCode, PushInput, PushOutput};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Work handed to a worker.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    /// Snapshot of the stream's status at dispatch time.
    pub status: StreamStatus,
}

/// A worker's report.
#[derive(Debug)]
pub struct WorkResult {
    /// Stream the worker ran for.
    pub stream: String,
    /// Whether the stream should be run again right away.
    pub should_continue: bool,
    /// Whether the receiver accepted a push without moving forward.
    pub throttled: bool,
    /// Cursor updates to merge, possibly about other streams.
    pub updates: Vec<StreamUpdate>,
    /// Error that ended the cycle.
    pub error: Option<PusherError>,
}

impl WorkResult {
    fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            should_continue: false,
            throttled: false,
            updates: Vec::new(),
            error: None,
        }
    }

    /// A cycle that made progress or needs another round.
    pub fn progressed(stream: impl Into<String>, updates: Vec<StreamUpdate>) -> Self {
        Self {
            should_continue: true,
            updates,
            ..Self::new(stream)
        }
    }

    /// A cycle that found nothing left to push.
    pub fn caught_up(stream: impl Into<String>, updates: Vec<StreamUpdate>) -> Self {
        Self {
            updates,
            ..Self::new(stream)
        }
    }

    /// A cycle that ended with `error`.
    pub fn failed(stream: impl Into<String>, error: PusherError) -> Self {
        Self {
            should_continue: true,
            error: Some(error),
            ..Self::new(stream)
        }
    }

    /// A cycle interrupted by shutdown before doing anything.
    pub fn interrupted(stream: impl Into<String>) -> Self {
        Self {
            should_continue: true,
            ..Self::new(stream)
        }
    }
}

/// Everything a worker needs, shared by all workers of one pusher.
pub(crate) struct WorkerContext<R, T> {
    pub(crate) subscription_id: String,
    pub(crate) request_timeout: Duration,
    pub(crate) max_base_corrections: u32,
    pub(crate) reader: Arc<R>,
    pub(crate) transport: Arc<T>,
    pub(crate) stop: watch::Receiver<bool>,
}

impl<R: Reader, T: PushTransport> WorkerContext<R, T> {
    /// Runs one cycle for the stream in `request`.
    ///
    /// Errors are reported in the result, never returned.
    pub async fn run(&self, request: WorkRequest) -> WorkResult {
        let status = request.status;

        if !status.backoff.is_zero() && !self.sleep(status.backoff).await {
            debug!(stream = %status.stream, "backoff interrupted by stop");
            return WorkResult::interrupted(status.stream);
        }

        match self.cycle(&status).await {
            Ok(result) => result,
            Err(err) => WorkResult::failed(status.stream, err),
        }
    }

    async fn cycle(&self, status: &StreamStatus) -> PusherResult<WorkResult> {
        let stream = status.stream.as_str();

        let Some(acked) = status.target_acked.clone() else {
            let resolved = self.resolve(stream).await?;
            info!(stream, offset = %resolved.offset_string(), "resolved receiver position");
            return Ok(WorkResult::progressed(stream, vec![StreamUpdate::acked(resolved)]));
        };

        let mut base = acked;
        let mut updates = Vec::new();
        let mut corrections = 0u32;

        loop {
            let batch = self.timed(self.reader.read(&base)).await?;
            if batch.is_empty() {
                debug!(stream, offset = %base.offset_string(), "caught up");
                return Ok(WorkResult::caught_up(stream, updates));
            }

            let lines = batch.len();
            let writer_head = batch.last_ptr_after().cloned();
            let input = PushInput::new(self.subscription_id.as_str(), batch);
            let output = self.timed(self.transport.push(&input)).await?;

            match output.code {
                PushCode::Success => {
                    let accepted = accepted_offset(&output, stream)?;
                    let throttled = accepted.position_equals(&base);
                    if throttled {
                        debug!(stream, offset = %base.offset_string(), "receiver did not move");
                    } else {
                        debug!(stream, lines, offset = %accepted.offset_string(), "pushed");
                    }

                    updates.push(StreamUpdate::acked(accepted).with_writer_largest(writer_head));
                    for behind in output.behind_cursors {
                        info!(stream = behind.stream(), offset = %behind.offset_string(), "receiver is behind");
                        updates.push(StreamUpdate::behind(behind));
                    }

                    let mut result = WorkResult::progressed(stream, updates);
                    result.throttled = throttled;
                    return Ok(result);
                }
                PushCode::IncorrectBaseOffset => {
                    let corrected = accepted_offset(&output, stream)?;
                    corrections += 1;
                    warn!(
                        stream,
                        pushed_from = %base.offset_string(),
                        receiver_at = %corrected.offset_string(),
                        "receiver expected another base offset"
                    );
                    updates.push(StreamUpdate::acked(corrected.clone()));

                    if corrections >= self.max_base_corrections {
                        return Ok(WorkResult::progressed(stream, updates));
                    }
                    base = corrected;
                }
                code => {
                    return Err(PusherError::UnexpectedCode {
                        stream: stream.to_string(),
                        code,
                    })
                }
            }
        }
    }

    /// Asks the receiver where it stands on `stream`.
    async fn resolve(&self, stream: &str) -> PusherResult<Cursor> {
        let query = PushInput::offset_query(self.subscription_id.as_str(), stream);
        let output = self.timed(self.transport.push(&query)).await?;

        match output.code {
            PushCode::IncorrectBaseOffset => accepted_offset(&output, stream),
            code => Err(PusherError::UnexpectedCode {
                stream: stream.to_string(),
                code,
            }),
        }
    }

    async fn timed<O>(&self, call: impl Future<Output = PusherResult<O>>) -> PusherResult<O> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| PusherError::Timeout(self.request_timeout))?
    }

    /// Sleeps for `duration`. Returns false if stop was requested first.
    async fn sleep(&self, duration: Duration) -> bool {
        let mut stop = self.stop.clone();
        if *stop.borrow_and_update() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = stop.wait_for(|stopped| *stopped) => false,
        }
    }
}

/// The accepted offset of `output`, checked to be a real position on `stream`.
fn accepted_offset(output: &PushOutput, stream: &str) -> PusherResult<Cursor> {
    let cursor = output.accepted_offset.clone().ok_or_else(|| {
        PusherError::Protocol(format!("{} response for {} has no offset", output.code, stream))
    })?;

    if cursor.stream() != stream {
        return Err(PusherError::Protocol(format!(
            "{} response for {} names stream {}",
            output.code,
            stream,
            cursor.stream()
        )));
    }
    if cursor.is_offset_query() {
        return Err(PusherError::Protocol(format!(
            "{} response for {} carries the offset-query sentinel",
            output.code, stream
        )));
    }

    Ok(cursor)
}
