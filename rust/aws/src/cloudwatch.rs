use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;

use logship::config::{ClientOptions, CloudWatchWriterOptions};
use logship::{CloudWatchFacade, FacadeError, FacadeErrorKind, LogMessage};

use crate::errors::{classify, code_is, MissingAs};

//////////////////////////////////////// AwsCloudWatchFacade ///////////////////////////////////////

/// CloudWatch Logs facade over the modern SDK.  The service serializes writes on a stream
/// without client-side sequence tokens, so none are threaded through here; the writer's
/// sequence-token handling stays dormant.
pub struct AwsCloudWatchFacade {
    client: aws_sdk_cloudwatchlogs::Client,
    options: CloudWatchWriterOptions,
}

impl AwsCloudWatchFacade {
    pub fn new(config: &aws_config::SdkConfig, options: CloudWatchWriterOptions) -> Self {
        AwsCloudWatchFacade {
            client: aws_sdk_cloudwatchlogs::Client::new(config),
            options,
        }
    }

    pub async fn from_client_options(
        client: &ClientOptions,
        options: CloudWatchWriterOptions,
    ) -> Self {
        let config = crate::sdk_config(client).await;
        AwsCloudWatchFacade::new(&config, options)
    }

    fn destination(&self) -> String {
        format!("{}/{}", self.options.log_group, self.options.log_stream)
    }
}

#[async_trait::async_trait]
impl CloudWatchFacade for AwsCloudWatchFacade {
    async fn find_log_group(&self) -> Result<Option<String>, FacadeError> {
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_log_groups()
                .log_group_name_prefix(&self.options.log_group)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|err| {
                    classify(
                        "DescribeLogGroups",
                        &self.destination(),
                        MissingAs::Nothing,
                        err,
                    )
                })?;
            for group in output.log_groups() {
                if group.log_group_name() == Some(self.options.log_group.as_str()) {
                    let arn = group
                        .arn()
                        .map(str::to_string)
                        .unwrap_or_else(|| self.options.log_group.clone());
                    return Ok(Some(arn));
                }
            }
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(None);
            }
        }
    }

    async fn create_log_group(&self) -> Result<(), FacadeError> {
        match self
            .client
            .create_log_group()
            .log_group_name(&self.options.log_group)
            .send()
            .await
        {
            Ok(_) => {
                tracing::info!("created log group {}", self.options.log_group);
                Ok(())
            }
            // Another writer won the creation race.
            Err(err) if code_is(&err, "ResourceAlreadyExistsException") => Ok(()),
            Err(err) => Err(classify(
                "CreateLogGroup",
                &self.destination(),
                MissingAs::Nothing,
                err,
            )),
        }
    }

    async fn set_log_group_retention(&self) -> Result<(), FacadeError> {
        let Some(days) = self.options.retention_period_days else {
            return Ok(());
        };
        self.client
            .put_retention_policy()
            .log_group_name(&self.options.log_group)
            .retention_in_days(days)
            .send()
            .await
            .map_err(|err| {
                classify(
                    "PutRetentionPolicy",
                    &self.destination(),
                    MissingAs::LogGroup,
                    err,
                )
            })?;
        Ok(())
    }

    async fn find_log_stream(&self) -> Result<Option<String>, FacadeError> {
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_log_streams()
                .log_group_name(&self.options.log_group)
                .log_stream_name_prefix(&self.options.log_stream)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|err| {
                    classify(
                        "DescribeLogStreams",
                        &self.destination(),
                        MissingAs::LogGroup,
                        err,
                    )
                })?;
            for stream in output.log_streams() {
                if stream.log_stream_name() == Some(self.options.log_stream.as_str()) {
                    let arn = stream
                        .arn()
                        .map(str::to_string)
                        .unwrap_or_else(|| self.options.log_stream.clone());
                    return Ok(Some(arn));
                }
            }
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(None);
            }
        }
    }

    async fn create_log_stream(&self) -> Result<(), FacadeError> {
        match self
            .client
            .create_log_stream()
            .log_group_name(&self.options.log_group)
            .log_stream_name(&self.options.log_stream)
            .send()
            .await
        {
            Ok(_) => {
                tracing::info!(
                    "created log stream {} in group {}",
                    self.options.log_stream,
                    self.options.log_group
                );
                Ok(())
            }
            Err(err) if code_is(&err, "ResourceAlreadyExistsException") => Ok(()),
            Err(err) => Err(classify(
                "CreateLogStream",
                &self.destination(),
                MissingAs::LogGroup,
                err,
            )),
        }
    }

    async fn put_events(&self, messages: &[LogMessage]) -> Result<(), FacadeError> {
        let mut events = Vec::with_capacity(messages.len());
        for message in messages {
            let event = InputLogEvent::builder()
                .timestamp(message.timestamp_ms() as i64)
                .message(message.text())
                .build()
                .map_err(|err| {
                    FacadeError::new(
                        FacadeErrorKind::UnexpectedException,
                        "PutLogEvents",
                        self.destination(),
                    )
                    .with_source(err)
                })?;
            events.push(event);
        }
        self.client
            .put_log_events()
            .log_group_name(&self.options.log_group)
            .log_stream_name(&self.options.log_stream)
            .set_log_events(Some(events))
            .send()
            .await
            .map_err(|err| {
                // The service reports a missing group and a missing stream with the same code;
                // the message says which one went away.
                let missing_as = match ProvideErrorMetadata::message(&err) {
                    Some(message) if message.contains("stream") => MissingAs::LogStream,
                    _ => MissingAs::LogGroup,
                };
                classify("PutLogEvents", &self.destination(), missing_as, err)
            })?;
        Ok(())
    }
}
