//! The scheduler.
//!
//! One task owns the stream table and dispatches at most
//! `max_worker_count` workers at a time. It waits on worker results, writer
//! notifications, the idle poll timer and the stop signal. Nothing else
//! mutates the table.

use crate::config::PusherConfig;
use crate::error::{PusherError, PusherResult};
use crate::pubsub::{NotificationStream, PubSubClient};
use crate::reader::Reader;
use crate::status::{StreamTable, StreamUpdate};
use crate::transport::PushTransport;
use crate::worker::{WorkRequest, WorkResult, WorkerContext};
use relay_protocol::{check_stream_name, Notification};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Pushes one subscription's streams to a receiver.
pub struct Pusher<R, T> {
    config: PusherConfig,
    reader: Arc<R>,
    transport: Arc<T>,
    notifications: Option<NotificationStream>,
}

impl<R, T> Pusher<R, T>
where
    R: Reader + 'static,
    T: PushTransport + 'static,
{
    /// Creates a pusher without notifications.
    ///
    /// Without notifications the pusher still replicates everything the
    /// subscription stream points at, but only notices new writes when it
    /// polls the idle subscription stream.
    pub fn new(config: PusherConfig, reader: Arc<R>, transport: Arc<T>) -> Self {
        Self {
            config,
            reader,
            transport,
            notifications: None,
        }
    }

    /// Uses `notifications` as the source of wake-ups.
    pub fn with_notifications(mut self, notifications: NotificationStream) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Subscribes to the subscription's topic on `pubsub`.
    pub fn subscribe(self, pubsub: &dyn PubSubClient) -> PusherResult<Self> {
        let stream = pubsub.subscribe(&self.config.subscription_topic())?;
        Ok(self.with_notifications(stream))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PusherConfig {
        &self.config
    }

    /// Starts the scheduler on the current runtime.
    pub fn spawn(self) -> PusherHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        PusherHandle { stop_tx, task }
    }

    /// Runs the scheduler until `stop` becomes true or a stream fails fatally.
    ///
    /// On stop no new workers are dispatched; in-flight workers are awaited
    /// before returning. A dropped stop sender counts as a stop request.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> PusherResult<()> {
        let subscription_stream = self.config.subscription_stream();
        check_stream_name(&subscription_stream)?;
        let max_workers = self.config.max_worker_count.max(1);
        let mut stopping = *stop.borrow_and_update();

        // Workers watch `halt`, which is raised on stop requests and on fatal errors.
        let (halt, halted) = watch::channel(stopping);
        let context = Arc::new(WorkerContext {
            subscription_id: self.config.subscription_id.clone(),
            request_timeout: self.config.request_timeout,
            max_base_corrections: self.config.max_base_corrections,
            reader: Arc::clone(&self.reader),
            transport: Arc::clone(&self.transport),
            stop: halted,
        });

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<WorkResult>();
        let mut notifications = self.notifications.take();
        let mut table = StreamTable::new();
        table.ensure(&subscription_stream);

        let mut in_flight = 0usize;
        let mut last_dispatched: Option<String> = None;
        let mut fatal: Option<PusherError> = None;

        // Notifications are best-effort; the subscription stream is re-read
        // periodically so a lost one only delays replication.
        let poll_period = self.config.idle_poll_interval.max(Duration::from_millis(1));
        let mut idle_poll = tokio::time::interval_at(Instant::now() + poll_period, poll_period);
        idle_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            subscription = %self.config.subscription_id,
            receiver = %self.config.receiver_url,
            max_workers,
            "pusher started"
        );

        loop {
            if !stopping {
                for stream in table.runnable_after(last_dispatched.as_deref()) {
                    if in_flight >= max_workers {
                        break;
                    }
                    let Some(status) = table.get_mut(&stream) else {
                        continue;
                    };
                    status.is_running = true;
                    status.rerun_requested = false;
                    let request = WorkRequest {
                        status: status.clone(),
                    };
                    in_flight += 1;
                    dispatch(Arc::clone(&context), request, result_tx.clone());
                    last_dispatched = Some(stream);
                }
            }

            if in_flight == 0 {
                if stopping {
                    break;
                }
                debug!(streams = table.len(), "idle");
            }

            tokio::select! {
                Some(result) = result_rx.recv() => {
                    in_flight -= 1;
                    if let Some(err) = self.complete(&mut table, result) {
                        if fatal.is_none() {
                            fatal = Some(err);
                        }
                        stopping = true;
                        halt.send_replace(true);
                    }
                }
                message = next_notification(&mut notifications) => {
                    match message {
                        Some(message) => self.notify(&mut table, &message),
                        None => {
                            warn!("notification stream closed; relying on the idle poll");
                            notifications = None;
                        }
                    }
                }
                _ = idle_poll.tick(), if !stopping => {
                    if let Some(status) = table.get_mut(&subscription_stream) {
                        if !status.should_run && !status.is_running && status.failed.is_none() {
                            debug!(stream = %subscription_stream, "polling idle subscription stream");
                            status.wake();
                        }
                    }
                }
                _ = stop.changed(), if !stopping => {
                    info!(in_flight, "stop requested; draining workers");
                    stopping = true;
                    halt.send_replace(true);
                }
            }
        }

        match fatal {
            Some(err) => {
                error!(error = %err, "pusher stopped after a fatal error");
                Err(err)
            }
            None => {
                info!(subscription = %self.config.subscription_id, "pusher stopped");
                Ok(())
            }
        }
    }

    /// Applies a worker's result to the table. Returns a fatal error, if any.
    fn complete(&self, table: &mut StreamTable, result: WorkResult) -> Option<PusherError> {
        let status = table.ensure(&result.stream);
        status.is_running = false;
        status.should_run = result.should_continue || status.rerun_requested;
        status.rerun_requested = false;

        let mut fatal = None;
        match result.error {
            Some(err) if err.is_fatal() => {
                error!(
                    stream = %status.stream,
                    offset = ?status.target_acked.as_ref().map(|c| c.offset_string()),
                    error = %err,
                    "stream failed"
                );
                status.failed = Some(err.to_string());
                status.should_run = false;
                fatal = Some(err);
            }
            Some(err) => {
                warn!(
                    stream = %status.stream,
                    offset = ?status.target_acked.as_ref().map(|c| c.offset_string()),
                    error = %err,
                    "push cycle failed; backing off"
                );
                status.backoff = self.config.error_backoff;
            }
            None if result.throttled => {
                debug!(stream = %status.stream, "receiver throttled; backing off");
                status.backoff = self.config.throttle_backoff;
            }
            None => status.backoff = Duration::ZERO,
        }

        for update in result.updates {
            table.merge(update);
        }
        fatal
    }

    fn notify(&self, table: &mut StreamTable, message: &[String]) {
        let topic = self.config.subscription_topic();
        match Notification::decode(message) {
            Ok(Some(notification)) if notification.topic == topic => {
                debug!(cursor = %notification.cursor, "writer notification");
                let stream = notification.cursor.stream().to_string();
                table.merge(StreamUpdate::writer_head(notification.cursor));
                if let Some(status) = table.get_mut(&stream) {
                    status.wake();
                }
            }
            Ok(Some(notification)) => {
                debug!(topic = %notification.topic, "notification for another topic");
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "malformed notification"),
        }
    }
}

fn dispatch<R, T>(
    context: Arc<WorkerContext<R, T>>,
    request: WorkRequest,
    results: mpsc::UnboundedSender<WorkResult>,
) where
    R: Reader + 'static,
    T: PushTransport + 'static,
{
    let stream = request.status.stream.clone();
    debug!(stream = %stream, "dispatching worker");
    tokio::spawn(async move {
        let mut report = ReportGuard {
            stream,
            results,
            sent: false,
        };
        let result = context.run(request).await;
        report.send(result);
    });
}

/// Reports a worker that ended without a result, so the scheduler never
/// waits on it forever.
struct ReportGuard {
    stream: String,
    results: mpsc::UnboundedSender<WorkResult>,
    sent: bool,
}

impl ReportGuard {
    fn send(&mut self, result: WorkResult) {
        self.sent = true;
        let _ = self.results.send(result);
    }
}

impl Drop for ReportGuard {
    fn drop(&mut self) {
        if !self.sent {
            let error = PusherError::Internal(format!("worker for {} ended abnormally", self.stream));
            let _ = self
                .results
                .send(WorkResult::failed(self.stream.clone(), error));
        }
    }
}

async fn next_notification(stream: &mut Option<NotificationStream>) -> Option<Vec<String>> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle to a spawned pusher.
///
/// Dropping the handle stops the pusher.
#[derive(Debug)]
pub struct PusherHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<PusherResult<()>>,
}

impl PusherHandle {
    /// Asks the pusher to stop without waiting.
    pub fn request_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Returns true once the scheduler task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the pusher and waits for in-flight workers to finish.
    pub async fn stop(self) -> PusherResult<()> {
        self.request_stop();
        self.join().await
    }

    /// Waits for the pusher to end on its own.
    pub async fn join(self) -> PusherResult<()> {
        // Keep the sender alive: dropping it would read as a stop request.
        let PusherHandle { stop_tx, task } = self;
        let outcome = task
            .await
            .map_err(|e| PusherError::Internal(format!("pusher task failed: {}", e)))?;
        drop(stop_tx);
        outcome
    }
}
