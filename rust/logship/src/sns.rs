use std::sync::{Arc, LazyLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{SnsWriterOptions, WriterOptions};
use crate::facade::{FacadeError, FacadeErrorKind, SnsFacade};
use crate::retry::RetryManager;
use crate::stats::WriterStatistics;
use crate::writer::{LogWriter, WriterBackend, WriterError};
use crate::LogMessage;

/// Publish accepts at most 256 KiB per message.  There is no batch API, so "batches" are single
/// messages.
pub const MAX_MESSAGE_BYTES: usize = 262_144;
pub const MAX_SUBJECT_CHARS: usize = 100;

static TOPIC_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,256}$").unwrap());
static TOPIC_ARN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^arn:aws[^:]*:sns:[^:]+:\d{12}:[A-Za-z0-9_-]+$").unwrap());

const SEND_INITIAL_SLEEP: Duration = Duration::from_millis(200);
const SEND_MAXIMUM_SLEEP: Duration = Duration::from_secs(2);
const INIT_INITIAL_SLEEP: Duration = Duration::from_millis(100);
const INIT_MAXIMUM_SLEEP: Duration = Duration::from_secs(2);

/// A subject must be at most 100 characters of printable ASCII and must not start with a space.
fn validate_subject(subject: &str) -> Result<(), WriterError> {
    if subject.len() > MAX_SUBJECT_CHARS {
        return Err(WriterError::InvalidConfiguration(format!(
            "subject exceeds {} characters",
            MAX_SUBJECT_CHARS
        )));
    }
    if subject.starts_with(' ') {
        return Err(WriterError::InvalidConfiguration(
            "subject must not start with a space".to_string(),
        ));
    }
    if !subject.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(WriterError::InvalidConfiguration(
            "subject must be ASCII with no control characters".to_string(),
        ));
    }
    Ok(())
}

/////////////////////////////////////////////// SnsBackend /////////////////////////////////////////

/// Writer backend for an SNS topic.  Topics are resolved by ARN or by name over the paginated
/// listing; creation is only possible when configured by name.
pub struct SnsBackend {
    options: SnsWriterOptions,
    facade: Arc<dyn SnsFacade>,
    stats: Arc<WriterStatistics>,
    send_timeout: Duration,
}

impl SnsBackend {
    pub fn new(
        options: SnsWriterOptions,
        writer_options: &WriterOptions,
        facade: Arc<dyn SnsFacade>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        SnsBackend {
            options,
            facade,
            stats,
            send_timeout: Duration::from_millis(writer_options.send_timeout_ms),
        }
    }

    fn validate(&self) -> Result<(), WriterError> {
        match (&self.options.topic_name, &self.options.topic_arn) {
            (None, None) => {
                return Err(WriterError::InvalidConfiguration(
                    "one of topic_name and topic_arn must be set".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(WriterError::InvalidConfiguration(
                    "only one of topic_name and topic_arn may be set".to_string(),
                ));
            }
            (Some(name), None) => {
                if !TOPIC_NAME.is_match(name) {
                    return Err(WriterError::InvalidConfiguration(format!(
                        "invalid topic name: {:?}",
                        name
                    )));
                }
            }
            (None, Some(arn)) => {
                if !TOPIC_ARN.is_match(arn) {
                    return Err(WriterError::InvalidConfiguration(format!(
                        "invalid topic arn: {:?}",
                        arn
                    )));
                }
            }
        }
        if let Some(subject) = &self.options.subject {
            validate_subject(subject)?;
        }
        Ok(())
    }

    fn topic(&self) -> &str {
        self.options
            .topic_arn
            .as_deref()
            .or(self.options.topic_name.as_deref())
            .unwrap_or("<unconfigured>")
    }
}

#[async_trait::async_trait]
impl WriterBackend for SnsBackend {
    fn destination(&self) -> String {
        format!("topic {}", self.topic())
    }

    fn max_message_size(&self) -> usize {
        MAX_MESSAGE_BYTES
    }

    fn max_batch_bytes(&self) -> usize {
        MAX_MESSAGE_BYTES
    }

    /// No batch API; every batch is one publish call.
    fn max_batch_count(&self) -> usize {
        1
    }

    async fn ensure_destination_available(&self, deadline: Instant) -> Result<(), WriterError> {
        self.validate()?;
        let retry = RetryManager::exponential(INIT_INITIAL_SLEEP, INIT_MAXIMUM_SLEEP, deadline);
        let arn = retry
            .invoke_with_handler(
                || {
                    let facade = &self.facade;
                    async move { facade.lookup_topic().await }
                },
                |err: FacadeError| {
                    if err.retryable {
                        tracing::warn!("retrying topic lookup after error: {}", err);
                        Ok(())
                    } else {
                        Err(err)
                    }
                },
            )
            .await?;
        match arn {
            Some(_) => Ok(()),
            None if self.options.auto_create && self.options.topic_name.is_some() => {
                let arn = self.facade.create_topic().await?;
                tracing::info!("created topic {}", arn);
                Ok(())
            }
            None => Err(WriterError::DestinationUnavailable(format!(
                "topic {} does not exist{}",
                self.topic(),
                if self.options.topic_arn.is_some() {
                    "; topics configured by arn are never auto-created"
                } else {
                    " and auto_create is disabled"
                }
            ))),
        }
    }

    async fn send_batch(&self, batch: Vec<LogMessage>) -> Vec<LogMessage> {
        let deadline = Instant::now() + self.send_timeout;
        let mut unsent = vec![];
        for message in batch {
            let retry = RetryManager::exponential(SEND_INITIAL_SLEEP, SEND_MAXIMUM_SLEEP, deadline);
            let result = retry
                .invoke_with_handler(
                    || {
                        let facade = &self.facade;
                        let message = &message;
                        async move { facade.publish(message).await.map(Some) }
                    },
                    |err: FacadeError| {
                        if err.kind == FacadeErrorKind::Throttling {
                            self.stats.record_throttled(1);
                            Ok(())
                        } else if err.retryable {
                            tracing::warn!("retrying publish after error: {}", err);
                            Ok(())
                        } else {
                            Err(err)
                        }
                    },
                )
                .await;
            match result {
                Ok(Some(())) => {}
                Ok(None) => {
                    self.stats.record_error("publish timed out", None);
                    unsent.push(message);
                }
                Err(err) => {
                    tracing::error!("publish to {} failed: {}", self.destination(), err);
                    self.stats.record_error("publish failed", Some(&err));
                    unsent.push(message);
                }
            }
        }
        unsent
    }

    async fn shutdown(&self) {
        self.facade.shutdown().await;
    }
}

impl LogWriter<SnsBackend> {
    /// A writer shipping to an SNS topic.
    pub fn sns(
        options: WriterOptions,
        destination: SnsWriterOptions,
        facade: Arc<dyn SnsFacade>,
        stats: Arc<WriterStatistics>,
    ) -> Self {
        let backend = SnsBackend::new(destination, &options, facade, Arc::clone(&stats));
        LogWriter::new(options, stats, backend)
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
