use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::WriterOptions;
use crate::facade::FacadeError;
use crate::queue::MessageQueue;
use crate::stats::{StatisticsSnapshot, WriterStatistics};
use crate::{DiscardAction, LogMessage, WriterState};

/// Extra time granted beyond two batch delays for the final drain.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

fn state_to_u8(state: WriterState) -> u8 {
    match state {
        WriterState::Created => 0,
        WriterState::Initializing => 1,
        WriterState::Ready => 2,
        WriterState::ShuttingDown => 3,
        WriterState::Stopped => 4,
    }
}

fn state_from_u8(state: u8) -> WriterState {
    match state {
        0 => WriterState::Created,
        1 => WriterState::Initializing,
        2 => WriterState::Ready,
        3 => WriterState::ShuttingDown,
        _ => WriterState::Stopped,
    }
}

///////////////////////////////////////////// WriterError //////////////////////////////////////////

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("destination unavailable: {0}")]
    DestinationUnavailable(String),
    #[error("initialization timed out")]
    InitializationTimeout,
    #[error("writer already started")]
    AlreadyStarted,
    #[error(transparent)]
    Facade(#[from] FacadeError),
}

//////////////////////////////////////////// WriterBackend /////////////////////////////////////////

/// The destination-specific half of a writer.  The scheduling core owns the queue and the batch
/// loop; the backend knows the service's limits, provisions the destination, and sends batches.
#[async_trait::async_trait]
pub trait WriterBackend: Send + Sync + 'static {
    /// Human-readable destination for diagnostics, e.g. "log group example / stream main".
    fn destination(&self) -> String;

    /// Largest single message the service accepts, after per-message overhead.
    fn max_message_size(&self) -> usize;

    /// Cap on the sum of `effective_size` over one batch.
    fn max_batch_bytes(&self) -> usize;

    /// Cap on the number of messages in one batch.
    fn max_batch_count(&self) -> usize;

    /// Bytes `message` contributes toward the batch cap, including per-message overhead.
    fn effective_size(&self, message: &LogMessage) -> usize {
        message.size()
    }

    /// Whether a message stamped `candidate_ms` may ride in a batch whose first message is
    /// stamped `first_ms`.  Messages rejected here are dropped, not requeued.
    fn accepts_timestamp(&self, _first_ms: u64, _candidate_ms: u64) -> bool {
        true
    }

    /// Make the remote destination exist, creating it if allowed, waiting for visibility up to
    /// `deadline`.
    async fn ensure_destination_available(&self, deadline: Instant) -> Result<(), WriterError>;

    /// Send one batch.  Returns the messages that must be requeued.  Errors are classified and
    /// recorded internally; this never takes the worker down.
    async fn send_batch(&self, batch: Vec<LogMessage>) -> Vec<LogMessage>;

    async fn shutdown(&self) {}
}

////////////////////////////////////////////// LogWriter ///////////////////////////////////////////

struct Inner<B> {
    backend: B,
    queue: MessageQueue,
    stats: Arc<WriterStatistics>,
    options: WriterOptions,
    batch_delay_ms: AtomicU64,
    state: AtomicU8,
    stop_requested: AtomicBool,
    shutdown: tokio::sync::Notify,
    terminated: tokio::sync::Notify,
}

/// A per-destination writer.  Producers hand it messages; a background worker drains the queue
/// into batches and ships them through the backend.  In synchronous mode there is no worker and
/// each `add_message` sends on the calling task.
pub struct LogWriter<B: WriterBackend> {
    inner: Arc<Inner<B>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<B: WriterBackend> LogWriter<B> {
    pub fn new(options: WriterOptions, stats: Arc<WriterStatistics>, backend: B) -> Self {
        let queue = MessageQueue::new(options.discard_threshold, options.discard_action);
        let batch_delay_ms = if options.synchronous {
            0
        } else {
            options.batch_delay_ms
        };
        LogWriter {
            inner: Arc::new(Inner {
                backend,
                queue,
                stats,
                batch_delay_ms: AtomicU64::new(batch_delay_ms),
                options,
                state: AtomicU8::new(state_to_u8(WriterState::Created)),
                stop_requested: AtomicBool::new(false),
                shutdown: tokio::sync::Notify::new(),
                terminated: tokio::sync::Notify::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WriterState {
        self.inner.state()
    }

    /// Start the writer.  In the default mode this spawns the background worker and returns
    /// immediately; initialization failures surface through `state` and `last_error`.  In
    /// synchronous mode initialization runs inline and its result is returned.
    pub async fn start(&self) -> Result<(), WriterError> {
        if !self.inner.transition(WriterState::Created, WriterState::Initializing) {
            return Err(WriterError::AlreadyStarted);
        }
        if self.inner.options.synchronous {
            let deadline =
                Instant::now() + Duration::from_millis(self.inner.options.initialization_timeout_ms);
            match self.inner.backend.ensure_destination_available(deadline).await {
                Ok(()) => {
                    self.inner.transition(WriterState::Initializing, WriterState::Ready);
                    Ok(())
                }
                Err(err) => {
                    self.inner.fail_initialization(&err);
                    Err(err)
                }
            }
        } else {
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move { Inner::run(inner).await });
            // Mutex poisoning.
            *self.worker.lock().unwrap() = Some(handle);
            Ok(())
        }
    }

    /// Hand a message to the writer.  Never blocks on the queue; oversize messages are truncated
    /// or dropped per configuration.  In synchronous mode this also builds and sends a batch
    /// before returning.
    pub async fn add_message(&self, message: LogMessage) {
        match self.inner.state() {
            WriterState::ShuttingDown | WriterState::Stopped => {
                tracing::warn!(
                    "discarding message added to stopped writer for {}",
                    self.inner.backend.destination()
                );
                self.inner.stats.record_discarded(1);
                return;
            }
            WriterState::Created | WriterState::Initializing | WriterState::Ready => {}
        }
        let mut message = message;
        let max_message_size = self.inner.backend.max_message_size();
        if message.size() > max_message_size {
            if self.inner.options.truncate_oversize_messages {
                message.truncate(max_message_size);
            } else {
                tracing::warn!(
                    "dropping oversize message: {} bytes exceeds the {} byte limit for {}",
                    message.size(),
                    max_message_size,
                    self.inner.backend.destination()
                );
                self.inner.stats.record_oversize_dropped(1);
                return;
            }
        }
        self.inner.queue.enqueue(message);
        if self.inner.options.synchronous && self.inner.state() == WriterState::Ready {
            Inner::run_once(&self.inner).await;
        }
    }

    pub fn set_batch_delay(&self, batch_delay_ms: u64) {
        self.inner.batch_delay_ms.store(batch_delay_ms, Ordering::Relaxed);
    }

    pub fn set_discard_threshold(&self, discard_threshold: usize) {
        self.inner.queue.set_discard_threshold(discard_threshold);
    }

    pub fn set_discard_action(&self, discard_action: DiscardAction) {
        self.inner.queue.set_discard_action(discard_action);
    }

    pub fn is_message_too_large(&self, message: &LogMessage) -> bool {
        message.size() > self.inner.backend.max_message_size()
    }

    pub fn max_message_size(&self) -> usize {
        self.inner.backend.max_message_size()
    }

    /// Request shutdown.  Idempotent; callable from any task.  With a background worker this
    /// returns immediately and the worker drains within its grace period; use
    /// `await_termination` to observe completion.  In synchronous mode the drain happens here.
    pub async fn stop(&self) {
        if !self.inner.request_stop() {
            return;
        }
        if self.inner.options.synchronous && self.inner.state() == WriterState::ShuttingDown {
            let deadline = Instant::now()
                + Duration::from_millis(self.inner.options.batch_delay_ms) * 2
                + DRAIN_GRACE;
            while !self.inner.queue.is_empty() && Instant::now() < deadline {
                Inner::run_once(&self.inner).await;
            }
            self.inner.abandon_queue();
            self.inner.backend.shutdown().await;
            self.inner.set_state(WriterState::Stopped);
            self.inner.terminated.notify_waiters();
        }
    }

    /// Wait up to `timeout` for the writer to reach Stopped.  Returns whether it did.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.terminated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.state() == WriterState::Stopped {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.inner.state() == WriterState::Stopped;
            }
        }
    }

    /// A point-in-time copy of the writer's counters.
    pub fn statistics(&self) -> StatisticsSnapshot {
        let stats = &self.inner.stats;
        StatisticsSnapshot {
            messages_sent: stats.messages_sent(),
            messages_requeued: stats.messages_requeued(),
            messages_discarded: stats.messages_discarded(),
            oversize_dropped: stats.oversize_dropped(),
            messages_dropped_by_queue: self.inner.queue.dropped(),
            queued_messages: self.inner.queue.len() as u64,
            last_batch_size: stats.last_batch_size(),
            throttled_writes: stats.throttled_writes(),
            writer_race_retries: stats.writer_race_retries(),
            unrecovered_writer_race_retries: stats.unrecovered_writer_race_retries(),
            last_error: stats.last_error(),
        }
    }
}

impl<B: WriterBackend> Drop for LogWriter<B> {
    fn drop(&mut self) {
        if self.inner.options.use_shutdown_hook {
            // The worker holds its own Arc and drains detached.
            self.inner.request_stop();
        }
    }
}

impl<B: WriterBackend> Inner<B> {
    fn state(&self) -> WriterState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WriterState) {
        self.state.store(state_to_u8(state), Ordering::SeqCst);
    }

    fn transition(&self, from: WriterState, to: WriterState) -> bool {
        self.state
            .compare_exchange(
                state_to_u8(from),
                state_to_u8(to),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// First call wins; subsequent calls are no-ops.
    fn request_stop(&self) -> bool {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        if self.transition(WriterState::Created, WriterState::Stopped) {
            self.terminated.notify_waiters();
        } else {
            self.transition(WriterState::Initializing, WriterState::ShuttingDown);
            self.transition(WriterState::Ready, WriterState::ShuttingDown);
        }
        self.shutdown.notify_waiters();
        true
    }

    fn fail_initialization(&self, err: &WriterError) {
        tracing::error!(
            "failed to initialize writer for {}: {}",
            self.backend.destination(),
            err
        );
        self.stats.record_error("initialization failed", Some(err));
        self.set_state(WriterState::Stopped);
        self.terminated.notify_waiters();
    }

    fn abandon_queue(&self) {
        let mut abandoned = 0u64;
        while self.queue.dequeue().is_some() {
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::warn!(
                "abandoning {} queued messages for {} at shutdown",
                abandoned,
                self.backend.destination()
            );
            self.stats.record_discarded(abandoned);
        }
    }

    async fn run(inner: Arc<Self>) {
        let deadline =
            Instant::now() + Duration::from_millis(inner.options.initialization_timeout_ms);
        match inner.backend.ensure_destination_available(deadline).await {
            Ok(()) => {
                inner.transition(WriterState::Initializing, WriterState::Ready);
            }
            Err(err) => {
                inner.fail_initialization(&err);
                return;
            }
        }
        let mut drain_deadline: Option<Instant> = None;
        loop {
            let stopping = inner.stop_requested.load(Ordering::SeqCst);
            if stopping {
                let deadline = *drain_deadline.get_or_insert_with(|| {
                    Instant::now()
                        + Duration::from_millis(inner.batch_delay_ms.load(Ordering::Relaxed)) * 2
                        + DRAIN_GRACE
                });
                if inner.queue.is_empty() || Instant::now() >= deadline {
                    break;
                }
                let Some(first) = inner.queue.dequeue() else {
                    break;
                };
                Self::build_and_send(&inner, first).await;
                continue;
            }
            // A zero delay would spin; one millisecond is indistinguishable to producers.
            let batch_delay =
                Duration::from_millis(inner.batch_delay_ms.load(Ordering::Relaxed).max(1));
            let message = tokio::select! {
                message = inner.queue.dequeue_timeout(batch_delay) => message,
                _ = inner.shutdown.notified() => continue,
            };
            let Some(first) = message else {
                continue;
            };
            Self::build_and_send(&inner, first).await;
        }
        inner.abandon_queue();
        inner.backend.shutdown().await;
        inner.set_state(WriterState::Stopped);
        inner.terminated.notify_waiters();
    }

    async fn run_once(inner: &Arc<Self>) {
        let Some(first) = inner.queue.dequeue() else {
            return;
        };
        Self::build_and_send(inner, first).await;
    }

    async fn build_and_send(inner: &Arc<Self>, first: LogMessage) {
        let (batch, batch_bytes) = Self::build_batch(inner, first);
        if batch.is_empty() {
            return;
        }
        if inner.options.enable_batch_logging {
            tracing::debug!(
                "sending batch of {} messages ({} bytes) to {}",
                batch.len(),
                batch_bytes,
                inner.backend.destination()
            );
        }
        let batch_size = batch.len();
        let unsent = inner.backend.send_batch(batch).await;
        inner.stats.set_last_batch_size(batch_size as u64);
        inner.stats.record_sent((batch_size - unsent.len()) as u64);
        if !unsent.is_empty() {
            if inner.options.enable_batch_logging {
                tracing::debug!(
                    "requeueing {} of {} messages for {}",
                    unsent.len(),
                    batch_size,
                    inner.backend.destination()
                );
            }
            inner.stats.record_requeued(unsent.len() as u64);
            // requeue prepends, so walk backward to preserve relative order.
            for message in unsent.into_iter().rev() {
                inner.queue.requeue(message);
            }
        }
    }

    /// Greedily pull messages while the batch stays within the service's byte, count, and
    /// timestamp-window limits.  A message that would overflow the batch goes back to the head of
    /// the queue; a message outside the timestamp window is dropped.
    fn build_batch(inner: &Arc<Self>, first: LogMessage) -> (Vec<LogMessage>, usize) {
        let backend = &inner.backend;
        let max_batch_bytes = backend.max_batch_bytes();
        let max_batch_count = backend.max_batch_count();
        let first_ms = first.timestamp_ms();
        let mut batch_bytes = backend.effective_size(&first);
        let mut batch = vec![first];
        while batch.len() < max_batch_count {
            let Some(candidate) = inner.queue.dequeue() else {
                break;
            };
            if !backend.accepts_timestamp(first_ms, candidate.timestamp_ms()) {
                tracing::warn!(
                    "dropping message stamped {}ms: outside the acceptable window for {}",
                    candidate.timestamp_ms(),
                    backend.destination()
                );
                inner.stats.record_discarded(1);
                continue;
            }
            let candidate_bytes = backend.effective_size(&candidate);
            if batch_bytes + candidate_bytes > max_batch_bytes {
                inner.queue.requeue(candidate);
                break;
            }
            batch_bytes += candidate_bytes;
            batch.push(candidate);
        }
        (batch, batch_bytes)
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
