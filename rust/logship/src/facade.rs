use crate::LogMessage;

/////////////////////////////////////////// FacadeErrorKind ////////////////////////////////////////

/// FacadeErrorKind captures the uniform error taxonomy across all destinations.  The mapping from
/// SDK exceptions to kinds lives in the facade implementation and is the one point of truth for
/// retry decisions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FacadeErrorKind {
    /// The service asked us to slow down.
    Throttling,
    /// The request can never succeed as configured.
    InvalidConfiguration,
    /// Another writer advanced the stream's sequence token first.
    InvalidSequenceToken,
    /// The service already accepted this batch.
    AlreadyProcessed,
    /// The log group disappeared out from under us.
    MissingLogGroup,
    /// The log stream disappeared out from under us.
    MissingLogStream,
    /// An account or API limit was hit; the service recovers on its own.
    LimitExceeded,
    /// The operation was aborted mid-flight.
    Aborted,
    /// The destination exists but cannot accept the operation right now.
    InvalidState,
    /// Anything the taxonomy does not classify.
    UnexpectedException,
}

impl FacadeErrorKind {
    /// Whether an error of this kind is worth retrying absent other information.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            FacadeErrorKind::Throttling
                | FacadeErrorKind::InvalidSequenceToken
                | FacadeErrorKind::LimitExceeded
                | FacadeErrorKind::Aborted
                | FacadeErrorKind::InvalidState
        )
    }
}

///////////////////////////////////////////// FacadeError //////////////////////////////////////////

/// An error from a remote service, classified into the taxonomy above and tagged with the
/// operation and destination that produced it.
#[derive(Debug, thiserror::Error)]
#[error("{operation} against {destination} failed: {kind:?}")]
pub struct FacadeError {
    pub kind: FacadeErrorKind,
    pub retryable: bool,
    pub operation: &'static str,
    pub destination: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl FacadeError {
    pub fn new(kind: FacadeErrorKind, operation: &'static str, destination: impl Into<String>) -> Self {
        FacadeError {
            kind,
            retryable: kind.default_retryable(),
            operation,
            destination: destination.into(),
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

///////////////////////////////////////////// StreamStatus /////////////////////////////////////////

/// Lifecycle of a Kinesis stream as reported by the service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamStatus {
    Active,
    Creating,
    Updating,
    Deleting,
    DoesNotExist,
}

///////////////////////////////////////////// KinesisRecord ////////////////////////////////////////

/// A message paired with the partition key it will ship under.
#[derive(Clone, Debug)]
pub struct KinesisRecord {
    pub partition_key: String,
    pub message: LogMessage,
}

/////////////////////////////////////////// CloudWatchFacade ///////////////////////////////////////

/// Interface to CloudWatch Logs.  All calls happen on the owning writer's worker.
#[async_trait::async_trait]
pub trait CloudWatchFacade: Send + Sync {
    /// The ARN of the configured log group, or None if it does not exist.
    async fn find_log_group(&self) -> Result<Option<String>, FacadeError>;
    async fn create_log_group(&self) -> Result<(), FacadeError>;
    async fn set_log_group_retention(&self) -> Result<(), FacadeError>;
    /// The ARN of the configured log stream, or None if it does not exist.
    async fn find_log_stream(&self) -> Result<Option<String>, FacadeError>;
    async fn create_log_stream(&self) -> Result<(), FacadeError>;
    /// Write a batch of events.  Input must be sorted by timestamp.  All-or-nothing: an error
    /// means no event in the batch was accepted.
    async fn put_events(&self, messages: &[LogMessage]) -> Result<(), FacadeError>;
    async fn shutdown(&self) {}
}

///////////////////////////////////////////// KinesisFacade ////////////////////////////////////////

/// Interface to a Kinesis stream.
#[async_trait::async_trait]
pub trait KinesisFacade: Send + Sync {
    async fn retrieve_stream_status(&self) -> Result<StreamStatus, FacadeError>;
    async fn create_stream(&self) -> Result<(), FacadeError>;
    async fn set_retention_period(&self) -> Result<(), FacadeError>;
    /// Write a batch of records.  Partial failure is possible: the result is the subset of input
    /// records whose writes failed, in input order.
    async fn put_records(&self, records: &[KinesisRecord]) -> Result<Vec<KinesisRecord>, FacadeError>;
    async fn shutdown(&self) {}
}

/////////////////////////////////////////////// SnsFacade //////////////////////////////////////////

/// Interface to an SNS topic.  `lookup_topic` or `create_topic` must succeed before `publish` is
/// called; the facade remembers the resolved topic ARN.
#[async_trait::async_trait]
pub trait SnsFacade: Send + Sync {
    /// The ARN of the configured topic if it exists, resolved by ARN or by name within the
    /// current region.
    async fn lookup_topic(&self) -> Result<Option<String>, FacadeError>;
    async fn create_topic(&self) -> Result<String, FacadeError>;
    async fn publish(&self, message: &LogMessage) -> Result<(), FacadeError>;
    async fn shutdown(&self) {}
}
