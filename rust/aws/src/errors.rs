// Maps SDK errors onto the library's error taxonomy.  This is the one point of truth for retry
// decisions: every facade call funnels its failures through classify().

use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;

use logship::{FacadeError, FacadeErrorKind};

/// What a ResourceNotFound from this operation means.  CloudWatch reports a missing group and a
/// missing stream with the same code, so put-path callers pick based on the service message.
#[derive(Clone, Copy, Debug)]
pub(crate) enum MissingAs {
    LogGroup,
    LogStream,
    Nothing,
}

pub(crate) fn code_is<E, R>(err: &SdkError<E, R>, code: &str) -> bool
where
    E: ProvideErrorMetadata,
{
    ProvideErrorMetadata::code(err) == Some(code)
}

pub(crate) fn classify<E>(
    operation: &'static str,
    destination: &str,
    missing_as: MissingAs,
    err: SdkError<E, HttpResponse>,
) -> FacadeError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let transport_retryable = matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)
    );
    let code = ProvideErrorMetadata::code(&err).map(str::to_string);
    let kind = match code.as_deref() {
        Some(
            "ThrottlingException"
            | "Throttling"
            | "ProvisionedThroughputExceededException"
            | "RequestLimitExceeded"
            | "TooManyRequestsException",
        ) => FacadeErrorKind::Throttling,
        Some("InvalidSequenceTokenException") => FacadeErrorKind::InvalidSequenceToken,
        Some("DataAlreadyAcceptedException") => FacadeErrorKind::AlreadyProcessed,
        Some("ResourceNotFoundException" | "NotFoundException" | "NotFound") => match missing_as {
            MissingAs::LogGroup => FacadeErrorKind::MissingLogGroup,
            MissingAs::LogStream => FacadeErrorKind::MissingLogStream,
            MissingAs::Nothing => FacadeErrorKind::UnexpectedException,
        },
        Some("LimitExceededException") => FacadeErrorKind::LimitExceeded,
        Some("OperationAbortedException") => FacadeErrorKind::Aborted,
        Some("ResourceInUseException") => FacadeErrorKind::InvalidState,
        Some(
            "InvalidParameterException"
            | "InvalidParameterValueException"
            | "InvalidArgumentException"
            | "ValidationException"
            | "ValidationError"
            | "AccessDeniedException"
            | "AuthorizationErrorException"
            | "UnrecognizedClientException"
            | "InvalidClientTokenId"
            | "MissingAuthenticationToken",
        ) => FacadeErrorKind::InvalidConfiguration,
        _ => FacadeErrorKind::UnexpectedException,
    };
    let service_recovers = matches!(
        code.as_deref(),
        Some("ServiceUnavailableException" | "ServiceUnavailable" | "InternalFailure" | "InternalError")
    );
    let retryable = kind.default_retryable() || transport_retryable || service_recovers;
    FacadeError {
        kind,
        retryable,
        operation,
        destination: destination.to_string(),
        source: Some(Box::new(err)),
    }
}
