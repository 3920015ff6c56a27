use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{KinesisWriterOptions, WriterOptions};
use crate::facade::{FacadeError, FacadeErrorKind, KinesisFacade, KinesisRecord, StreamStatus};
use crate::retry::RetryManager;
use crate::stats::WriterStatistics;
use crate::writer::{LogWriter, WriterBackend, WriterError};
use crate::LogMessage;

/// PutRecords accepts at most 500 records and 5 MiB per request; each record may carry 1 MiB
/// including its partition key.
pub const MAX_BATCH_COUNT: usize = 500;
pub const MAX_BATCH_BYTES: usize = 5 * 1_048_576;
pub const MAX_RECORD_BYTES: usize = 1_048_576;
pub const MAX_PARTITION_KEY_BYTES: usize = 256;

/// Configuration sentinel requesting a fresh partition key per record.
pub const RANDOM_PARTITION_KEY: &str = "{random}";

/// Generated partition keys are uuids, which are 36 bytes in their hyphenated form.
const GENERATED_PARTITION_KEY_BYTES: usize = 36;

static STREAM_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_.-]{1,128}$").unwrap());

/// Stream creation takes tens of seconds; poll with a constant interval.
const STATUS_POLL_SLEEP: Duration = Duration::from_secs(1);
const SEND_INITIAL_SLEEP: Duration = Duration::from_millis(200);
const SEND_MAXIMUM_SLEEP: Duration = Duration::from_secs(2);

///////////////////////////////////////////// KinesisBackend ///////////////////////////////////////

/// Writer backend for a Kinesis stream.  Initialization is driven by the stream's reported
/// status; sends handle per-record failures by retrying the failed subset within the send
/// deadline and requeueing whatever remains.
pub struct KinesisBackend {
    options: KinesisWriterOptions,
    facade: Arc<dyn KinesisFacade>,
    stats: Arc<WriterStatistics>,
    send_timeout: Duration,
    partition_key_bytes: usize,
}

impl KinesisBackend {
    pub fn new(
        options: KinesisWriterOptions,
        writer_options: &WriterOptions,
        facade: Arc<dyn KinesisFacade>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        let partition_key_bytes = if options.partition_key == RANDOM_PARTITION_KEY {
            GENERATED_PARTITION_KEY_BYTES
        } else {
            options.partition_key.len()
        };
        KinesisBackend {
            options,
            facade,
            stats,
            send_timeout: Duration::from_millis(writer_options.send_timeout_ms),
            partition_key_bytes,
        }
    }

    fn validate(&self) -> Result<(), WriterError> {
        if !STREAM_NAME.is_match(&self.options.stream_name) {
            return Err(WriterError::InvalidConfiguration(format!(
                "invalid stream name: {:?}",
                self.options.stream_name
            )));
        }
        if self.options.partition_key.is_empty()
            || self.options.partition_key.len() > MAX_PARTITION_KEY_BYTES
        {
            return Err(WriterError::InvalidConfiguration(format!(
                "partition key must be 1..={} bytes",
                MAX_PARTITION_KEY_BYTES
            )));
        }
        if self.options.shard_count < 1 {
            return Err(WriterError::InvalidConfiguration(format!(
                "shard count must be positive, not {}",
                self.options.shard_count
            )));
        }
        Ok(())
    }

    fn partition_key(&self) -> String {
        if self.options.partition_key == RANDOM_PARTITION_KEY {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.options.partition_key.clone()
        }
    }

    /// Poll the stream status until it reports Active.  A stream observed Deleting aborts.
    async fn wait_until_active(&self, deadline: Instant) -> Result<(), WriterError> {
        let retry = RetryManager::linear(STATUS_POLL_SLEEP, deadline);
        let active = retry
            .invoke_with_handler(
                || {
                    let facade = &self.facade;
                    let stream = self.options.stream_name.as_str();
                    async move {
                        match facade.retrieve_stream_status().await? {
                            StreamStatus::Active => Ok(Some(())),
                            StreamStatus::Deleting => Err(FacadeError::new(
                                FacadeErrorKind::InvalidState,
                                "retrieve_stream_status",
                                stream,
                            )
                            .with_retryable(false)),
                            _ => Ok(None),
                        }
                    }
                },
                |err: FacadeError| {
                    if err.retryable {
                        tracing::warn!("retrying status poll after error: {}", err);
                        Ok(())
                    } else {
                        Err(err)
                    }
                },
            )
            .await
            .map_err(|err| {
                if err.kind == FacadeErrorKind::InvalidState {
                    WriterError::DestinationUnavailable(format!(
                        "stream {} is deleting",
                        self.options.stream_name
                    ))
                } else {
                    WriterError::Facade(err)
                }
            })?;
        if active.is_none() {
            return Err(WriterError::InitializationTimeout);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WriterBackend for KinesisBackend {
    fn destination(&self) -> String {
        format!("stream {}", self.options.stream_name)
    }

    fn max_message_size(&self) -> usize {
        MAX_RECORD_BYTES - self.partition_key_bytes
    }

    fn max_batch_bytes(&self) -> usize {
        MAX_BATCH_BYTES
    }

    fn max_batch_count(&self) -> usize {
        MAX_BATCH_COUNT
    }

    fn effective_size(&self, message: &LogMessage) -> usize {
        message.size() + self.partition_key_bytes
    }

    async fn ensure_destination_available(&self, deadline: Instant) -> Result<(), WriterError> {
        self.validate()?;
        let retry = RetryManager::exponential(SEND_INITIAL_SLEEP, SEND_MAXIMUM_SLEEP, deadline);
        let status = retry
            .invoke_with_handler(
                || {
                    let facade = &self.facade;
                    async move { facade.retrieve_stream_status().await.map(Some) }
                },
                |err: FacadeError| {
                    if err.retryable {
                        tracing::warn!("retrying status probe after error: {}", err);
                        Ok(())
                    } else {
                        Err(err)
                    }
                },
            )
            .await?;
        let Some(status) = status else {
            return Err(WriterError::InitializationTimeout);
        };
        match status {
            StreamStatus::Active => Ok(()),
            StreamStatus::DoesNotExist if self.options.auto_create => {
                self.facade.create_stream().await?;
                self.wait_until_active(deadline).await?;
                if self.options.retention_period_hours.is_some() {
                    if let Err(err) = self.facade.set_retention_period().await {
                        tracing::warn!(
                            "failed to set retention on stream {}: {}",
                            self.options.stream_name,
                            err
                        );
                    }
                }
                Ok(())
            }
            StreamStatus::DoesNotExist => Err(WriterError::DestinationUnavailable(format!(
                "stream {} does not exist and auto_create is disabled",
                self.options.stream_name
            ))),
            StreamStatus::Creating | StreamStatus::Updating => {
                self.wait_until_active(deadline).await
            }
            StreamStatus::Deleting => Err(WriterError::DestinationUnavailable(format!(
                "stream {} is deleting",
                self.options.stream_name
            ))),
        }
    }

    async fn send_batch(&self, batch: Vec<LogMessage>) -> Vec<LogMessage> {
        let records = batch
            .into_iter()
            .map(|message| KinesisRecord {
                partition_key: self.partition_key(),
                message,
            })
            .collect::<Vec<_>>();
        let deadline = Instant::now() + self.send_timeout;
        let retry = RetryManager::exponential(SEND_INITIAL_SLEEP, SEND_MAXIMUM_SLEEP, deadline);
        let pending = Mutex::new(records);
        let result = retry
            .invoke_with_handler(
                || {
                    let facade = &self.facade;
                    let stats = &self.stats;
                    let pending = &pending;
                    async move {
                        // Mutex poisoning.
                        let records = std::mem::take(&mut *pending.lock().unwrap());
                        if records.is_empty() {
                            return Ok(Some(()));
                        }
                        match facade.put_records(&records).await {
                            Ok(unsent) => {
                                if unsent.is_empty() {
                                    Ok(Some(()))
                                } else {
                                    // Per-record failures are throughput exceeded.
                                    stats.record_throttled(1);
                                    *pending.lock().unwrap() = unsent;
                                    Ok(None)
                                }
                            }
                            Err(err) => {
                                *pending.lock().unwrap() = records;
                                Err(err)
                            }
                        }
                    }
                },
                |err: FacadeError| {
                    if err.kind == FacadeErrorKind::Throttling {
                        self.stats.record_throttled(1);
                        Ok(())
                    } else if err.retryable {
                        tracing::warn!("retrying batch after error: {}", err);
                        Ok(())
                    } else {
                        Err(err)
                    }
                },
            )
            .await;
        match result {
            Ok(Some(())) => vec![],
            Ok(None) => {
                self.stats.record_error("batch send timed out", None);
                Self::unsent(pending)
            }
            Err(err) => {
                tracing::error!("batch send to {} failed: {}", self.destination(), err);
                self.stats.record_error("batch send failed", Some(&err));
                Self::unsent(pending)
            }
        }
    }

    async fn shutdown(&self) {
        self.facade.shutdown().await;
    }
}

impl KinesisBackend {
    fn unsent(pending: Mutex<Vec<KinesisRecord>>) -> Vec<LogMessage> {
        // Mutex poisoning.
        pending
            .into_inner()
            .unwrap()
            .into_iter()
            .map(|record| record.message)
            .collect()
    }
}

impl LogWriter<KinesisBackend> {
    /// A writer shipping to a Kinesis stream.
    pub fn kinesis(
        options: WriterOptions,
        destination: KinesisWriterOptions,
        facade: Arc<dyn KinesisFacade>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        let backend = KinesisBackend::new(destination, &options, facade, Arc::clone(&stats));
        LogWriter::new(options, stats, backend)
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    struct UnusedFacade;

    #[async_trait::async_trait]
    impl KinesisFacade for UnusedFacade {
        async fn retrieve_stream_status(&self) -> Result<StreamStatus, FacadeError> {
            unreachable!()
        }

        async fn create_stream(&self) -> Result<(), FacadeError> {
            unreachable!()
        }

        async fn set_retention_period(&self) -> Result<(), FacadeError> {
            unreachable!()
        }

        async fn put_records(
            &self,
            _: &[KinesisRecord],
        ) -> Result<Vec<KinesisRecord>, FacadeError> {
            unreachable!()
        }
    }

    fn options() -> KinesisWriterOptions {
        KinesisWriterOptions {
            stream_name: "events".to_string(),
            partition_key: "{random}".to_string(),
            shard_count: 1,
            retention_period_hours: None,
            auto_create: false,
        }
    }

    fn backend(options: KinesisWriterOptions) -> KinesisBackend {
        KinesisBackend::new(
            options,
            &WriterOptions::default(),
            Arc::new(UnusedFacade),
            Arc::new(WriterStatistics::default()),
        )
    }

    #[test]
    fn random_partition_keys_are_fresh_per_record() {
        let backend = backend(options());
        let a = backend.partition_key();
        let b = backend.partition_key();
        assert_ne!(a, b);
        assert_eq!(GENERATED_PARTITION_KEY_BYTES, a.len());
    }

    #[test]
    fn static_partition_keys_are_stable() {
        let backend = backend(KinesisWriterOptions {
            partition_key: "host-17".to_string(),
            ..options()
        });
        assert_eq!("host-17", backend.partition_key());
        assert_eq!("host-17", backend.partition_key());
    }

    #[test]
    fn effective_size_includes_the_partition_key() {
        let backend1 = backend(KinesisWriterOptions {
            partition_key: "host-17".to_string(),
            ..options()
        });
        let message = LogMessage::new(1, "hello");
        assert_eq!(5 + 7, backend1.effective_size(&message));
        assert_eq!(MAX_RECORD_BYTES - 7, backend1.max_message_size());

        let backend2 = backend(options());
        assert_eq!(
            5 + GENERATED_PARTITION_KEY_BYTES,
            backend2.effective_size(&message)
        );
    }

    #[test]
    fn validation_rejects_bad_configuration() {
        let backend1 = backend(KinesisWriterOptions {
            stream_name: "not valid!".to_string(),
            ..options()
        });
        assert!(matches!(
            backend1.validate(),
            Err(WriterError::InvalidConfiguration(_))
        ));

        let backend2 = backend(KinesisWriterOptions {
            partition_key: "x".repeat(257),
            ..options()
        });
        assert!(matches!(
            backend2.validate(),
            Err(WriterError::InvalidConfiguration(_))
        ));

        let backend3 = backend(KinesisWriterOptions {
            shard_count: 0,
            ..options()
        });
        assert!(matches!(
            backend3.validate(),
            Err(WriterError::InvalidConfiguration(_))
        ));

        assert!(backend(options()).validate().is_ok());
    }
}
