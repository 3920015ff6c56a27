use std::sync::Mutex;

use logship::config::{ClientOptions, SnsWriterOptions};
use logship::{FacadeError, FacadeErrorKind, LogMessage, SnsFacade};

use crate::errors::{classify, MissingAs};

//////////////////////////////////////////// AwsSnsFacade //////////////////////////////////////////

/// SNS facade over the modern SDK.  `lookup_topic` and `create_topic` record the resolved ARN,
/// which `publish` then targets.
pub struct AwsSnsFacade {
    client: aws_sdk_sns::Client,
    options: SnsWriterOptions,
    resolved_arn: Mutex<Option<String>>,
}

impl AwsSnsFacade {
    pub fn new(config: &aws_config::SdkConfig, options: SnsWriterOptions) -> Self {
        AwsSnsFacade {
            client: aws_sdk_sns::Client::new(config),
            options,
            resolved_arn: Mutex::new(None),
        }
    }

    pub async fn from_client_options(client: &ClientOptions, options: SnsWriterOptions) -> Self {
        let config = crate::sdk_config(client).await;
        AwsSnsFacade::new(&config, options)
    }

    fn destination(&self) -> String {
        self.options
            .topic_arn
            .clone()
            .or_else(|| self.options.topic_name.clone())
            .unwrap_or_else(|| "<unconfigured>".to_string())
    }

    fn remember(&self, arn: &str) {
        // Mutex poisoning.
        *self.resolved_arn.lock().unwrap() = Some(arn.to_string());
    }

    fn wanted(&self, arn: &str) -> bool {
        if let Some(configured) = &self.options.topic_arn {
            return configured == arn;
        }
        if let Some(name) = &self.options.topic_name {
            // A topic ARN ends with its name; names are region-scoped by the client itself.
            return arn.rsplit(':').next() == Some(name.as_str());
        }
        false
    }
}

#[async_trait::async_trait]
impl SnsFacade for AwsSnsFacade {
    async fn lookup_topic(&self) -> Result<Option<String>, FacadeError> {
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_topics()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|err| {
                    classify("ListTopics", &self.destination(), MissingAs::Nothing, err)
                })?;
            for topic in output.topics() {
                if let Some(arn) = topic.topic_arn() {
                    if self.wanted(arn) {
                        self.remember(arn);
                        return Ok(Some(arn.to_string()));
                    }
                }
            }
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(None);
            }
        }
    }

    async fn create_topic(&self) -> Result<String, FacadeError> {
        let Some(name) = &self.options.topic_name else {
            return Err(FacadeError::new(
                FacadeErrorKind::InvalidConfiguration,
                "CreateTopic",
                self.destination(),
            ));
        };
        let output = self
            .client
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|err| {
                classify("CreateTopic", &self.destination(), MissingAs::Nothing, err)
            })?;
        let Some(arn) = output.topic_arn() else {
            return Err(FacadeError::new(
                FacadeErrorKind::UnexpectedException,
                "CreateTopic",
                self.destination(),
            ));
        };
        self.remember(arn);
        Ok(arn.to_string())
    }

    async fn publish(&self, message: &LogMessage) -> Result<(), FacadeError> {
        // Mutex poisoning.
        let arn = self.resolved_arn.lock().unwrap().clone();
        let Some(arn) = arn else {
            return Err(FacadeError::new(
                FacadeErrorKind::InvalidState,
                "Publish",
                self.destination(),
            )
            .with_retryable(false));
        };
        let mut request = self
            .client
            .publish()
            .topic_arn(arn)
            .message(message.text());
        if let Some(subject) = &self.options.subject {
            request = request.subject(subject);
        }
        request.send().await.map_err(|err| {
            classify("Publish", &self.destination(), MissingAs::Nothing, err)
        })?;
        Ok(())
    }
}
