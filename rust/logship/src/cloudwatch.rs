use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{CloudWatchWriterOptions, WriterOptions};
use crate::facade::{CloudWatchFacade, FacadeError, FacadeErrorKind};
use crate::retry::RetryManager;
use crate::stats::WriterStatistics;
use crate::writer::{LogWriter, WriterBackend, WriterError};
use crate::LogMessage;

/// PutLogEvents accepts at most 1 MiB per batch and 10,000 events per batch.  Each event carries
/// 26 bytes of service-side overhead on top of its message bytes.
pub const MAX_BATCH_BYTES: usize = 1_048_576;
pub const MAX_BATCH_COUNT: usize = 10_000;
pub const EVENT_OVERHEAD_BYTES: usize = 26;
pub const MAX_EVENT_BYTES: usize = 262_144;

/// Events may trail the first event of their batch by 14 days and lead it by 2 hours.
const BACKWARD_WINDOW_MS: u64 = 14 * 24 * 60 * 60 * 1_000;
const FORWARD_WINDOW_MS: u64 = 2 * 60 * 60 * 1_000;

/// Retention periods the service accepts, in days.
const RETENTION_DAYS: &[i32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

static LOG_GROUP_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_\-/.#]{1,512}$").unwrap());
static LOG_STREAM_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[^:*]{1,512}$").unwrap());

const INIT_INITIAL_SLEEP: Duration = Duration::from_millis(100);
const INIT_MAXIMUM_SLEEP: Duration = Duration::from_secs(2);
const SEND_INITIAL_SLEEP: Duration = Duration::from_millis(200);
const SEND_MAXIMUM_SLEEP: Duration = Duration::from_secs(2);

/////////////////////////////////////////// CloudWatchBackend //////////////////////////////////////

/// Writer backend for CloudWatch Logs.  Provisions the log group and stream, sorts every batch
/// by timestamp, and applies the per-reason decision table on send failures.
pub struct CloudWatchBackend {
    options: CloudWatchWriterOptions,
    facade: Arc<dyn CloudWatchFacade>,
    stats: Arc<WriterStatistics>,
    send_timeout: Duration,
    initialization_timeout: Duration,
}

impl CloudWatchBackend {
    pub fn new(
        options: CloudWatchWriterOptions,
        writer_options: &WriterOptions,
        facade: Arc<dyn CloudWatchFacade>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        CloudWatchBackend {
            options,
            facade,
            stats,
            send_timeout: Duration::from_millis(writer_options.send_timeout_ms),
            initialization_timeout: Duration::from_millis(writer_options.initialization_timeout_ms),
        }
    }

    fn validate(&self) -> Result<(), WriterError> {
        if !LOG_GROUP_NAME.is_match(&self.options.log_group) {
            return Err(WriterError::InvalidConfiguration(format!(
                "invalid log group name: {:?}",
                self.options.log_group
            )));
        }
        if !LOG_STREAM_NAME.is_match(&self.options.log_stream) {
            return Err(WriterError::InvalidConfiguration(format!(
                "invalid log stream name: {:?}",
                self.options.log_stream
            )));
        }
        if let Some(days) = self.options.retention_period_days {
            if !RETENTION_DAYS.contains(&days) {
                return Err(WriterError::InvalidConfiguration(format!(
                    "invalid retention period {} days; the service accepts {:?}",
                    days, RETENTION_DAYS
                )));
            }
        }
        Ok(())
    }

    fn swallow_retryable(err: FacadeError) -> Result<(), FacadeError> {
        if err.retryable {
            tracing::warn!("retrying initialization after error: {}", err);
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Wait until the log group is visible, creating it on the first miss.  Creation races with
    /// other writers are benign: create treats already-exists as success.
    async fn ensure_log_group(&self, deadline: Instant) -> Result<(), WriterError> {
        let retry = RetryManager::exponential(INIT_INITIAL_SLEEP, INIT_MAXIMUM_SLEEP, deadline);
        let arn = retry
            .invoke_with_handler(
                || {
                    let facade = &self.facade;
                    async move {
                        if let Some(arn) = facade.find_log_group().await? {
                            return Ok(Some(arn));
                        }
                        facade.create_log_group().await?;
                        facade.find_log_group().await
                    }
                },
                Self::swallow_retryable,
            )
            .await?;
        if arn.is_none() {
            return Err(WriterError::InitializationTimeout);
        }
        if self.options.retention_period_days.is_some() {
            if let Err(err) = self.facade.set_log_group_retention().await {
                tracing::warn!(
                    "failed to set retention on log group {}: {}",
                    self.options.log_group,
                    err
                );
            }
        }
        Ok(())
    }

    async fn ensure_log_stream(&self, deadline: Instant) -> Result<(), WriterError> {
        let retry = RetryManager::exponential(INIT_INITIAL_SLEEP, INIT_MAXIMUM_SLEEP, deadline);
        let arn = retry
            .invoke_with_handler(
                || {
                    let facade = &self.facade;
                    async move {
                        if let Some(arn) = facade.find_log_stream().await? {
                            return Ok(Some(arn));
                        }
                        facade.create_log_stream().await?;
                        facade.find_log_stream().await
                    }
                },
                Self::swallow_retryable,
            )
            .await?;
        if arn.is_none() {
            return Err(WriterError::InitializationTimeout);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WriterBackend for CloudWatchBackend {
    fn destination(&self) -> String {
        format!(
            "log group {} / stream {}",
            self.options.log_group, self.options.log_stream
        )
    }

    fn max_message_size(&self) -> usize {
        MAX_EVENT_BYTES - EVENT_OVERHEAD_BYTES
    }

    fn max_batch_bytes(&self) -> usize {
        MAX_BATCH_BYTES
    }

    fn max_batch_count(&self) -> usize {
        MAX_BATCH_COUNT
    }

    fn effective_size(&self, message: &LogMessage) -> usize {
        message.size() + EVENT_OVERHEAD_BYTES
    }

    fn accepts_timestamp(&self, first_ms: u64, candidate_ms: u64) -> bool {
        candidate_ms + BACKWARD_WINDOW_MS >= first_ms
            && candidate_ms <= first_ms + FORWARD_WINDOW_MS
    }

    async fn ensure_destination_available(&self, deadline: Instant) -> Result<(), WriterError> {
        self.validate()?;
        self.ensure_log_group(deadline).await?;
        self.ensure_log_stream(deadline).await
    }

    async fn send_batch(&self, mut batch: Vec<LogMessage>) -> Vec<LogMessage> {
        batch.sort_by_key(LogMessage::timestamp_ms);
        let deadline = Instant::now() + self.send_timeout;
        let retry = RetryManager::exponential(SEND_INITIAL_SLEEP, SEND_MAXIMUM_SLEEP, deadline);
        let raced = AtomicBool::new(false);
        let result = retry
            .invoke(|| {
                let facade = &self.facade;
                let stats = &self.stats;
                let raced = &raced;
                let batch = &batch;
                async move {
                    match facade.put_events(batch).await {
                        Ok(()) => Ok(Some(())),
                        Err(err) => match err.kind {
                            FacadeErrorKind::Throttling => {
                                stats.record_throttled(1);
                                Ok(None)
                            }
                            FacadeErrorKind::InvalidSequenceToken => {
                                stats.record_writer_race(1);
                                raced.store(true, Ordering::Relaxed);
                                Ok(None)
                            }
                            FacadeErrorKind::AlreadyProcessed => {
                                tracing::warn!(
                                    "batch already accepted by {}; dropping",
                                    err.destination
                                );
                                Ok(Some(()))
                            }
                            FacadeErrorKind::MissingLogGroup
                            | FacadeErrorKind::MissingLogStream => Err(err),
                            _ if err.retryable => {
                                tracing::warn!("retrying batch after error: {}", err);
                                Ok(None)
                            }
                            _ => Err(err),
                        },
                    }
                }
            })
            .await;
        match result {
            Ok(Some(())) => vec![],
            Ok(None) => {
                if raced.load(Ordering::Relaxed) {
                    self.stats.record_unrecovered_writer_race(1);
                }
                self.stats.record_error("batch send timed out", None);
                batch
            }
            Err(err)
                if matches!(
                    err.kind,
                    FacadeErrorKind::MissingLogGroup | FacadeErrorKind::MissingLogStream
                ) =>
            {
                tracing::warn!("{} vanished; reinitializing", self.destination());
                self.stats.record_error("destination missing", Some(&err));
                let deadline = Instant::now() + self.initialization_timeout;
                if let Err(err) = self.ensure_destination_available(deadline).await {
                    tracing::error!("failed to reinitialize {}: {}", self.destination(), err);
                }
                batch
            }
            Err(err) => {
                tracing::error!("batch send to {} failed: {}", self.destination(), err);
                self.stats.record_error("batch send failed", Some(&err));
                batch
            }
        }
    }

    async fn shutdown(&self) {
        self.facade.shutdown().await;
    }
}

impl LogWriter<CloudWatchBackend> {
    /// A writer shipping to a CloudWatch Logs group and stream.
    pub fn cloudwatch(
        options: WriterOptions,
        destination: CloudWatchWriterOptions,
        facade: Arc<dyn CloudWatchFacade>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        let backend = CloudWatchBackend::new(destination, &options, facade, Arc::clone(&stats));
        LogWriter::new(options, stats, backend)
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
