use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::PutRecordsRequestEntry;

use logship::config::{ClientOptions, KinesisWriterOptions};
use logship::{FacadeError, FacadeErrorKind, KinesisFacade, KinesisRecord, StreamStatus};

use crate::errors::{classify, code_is, MissingAs};

////////////////////////////////////////// AwsKinesisFacade ////////////////////////////////////////

/// Kinesis facade over the modern SDK.
pub struct AwsKinesisFacade {
    client: aws_sdk_kinesis::Client,
    options: KinesisWriterOptions,
}

impl AwsKinesisFacade {
    pub fn new(config: &aws_config::SdkConfig, options: KinesisWriterOptions) -> Self {
        AwsKinesisFacade {
            client: aws_sdk_kinesis::Client::new(config),
            options,
        }
    }

    pub async fn from_client_options(
        client: &ClientOptions,
        options: KinesisWriterOptions,
    ) -> Self {
        let config = crate::sdk_config(client).await;
        AwsKinesisFacade::new(&config, options)
    }
}

#[async_trait::async_trait]
impl KinesisFacade for AwsKinesisFacade {
    async fn retrieve_stream_status(&self) -> Result<StreamStatus, FacadeError> {
        match self
            .client
            .describe_stream_summary()
            .stream_name(&self.options.stream_name)
            .send()
            .await
        {
            Ok(output) => {
                let Some(summary) = output.stream_description_summary() else {
                    return Ok(StreamStatus::DoesNotExist);
                };
                Ok(match summary.stream_status().as_str() {
                    "ACTIVE" => StreamStatus::Active,
                    "CREATING" => StreamStatus::Creating,
                    "UPDATING" => StreamStatus::Updating,
                    "DELETING" => StreamStatus::Deleting,
                    // New lifecycle states are transitional; keep polling.
                    _ => StreamStatus::Updating,
                })
            }
            Err(err) if code_is(&err, "ResourceNotFoundException") => {
                Ok(StreamStatus::DoesNotExist)
            }
            Err(err) => Err(classify(
                "DescribeStreamSummary",
                &self.options.stream_name,
                MissingAs::Nothing,
                err,
            )),
        }
    }

    async fn create_stream(&self) -> Result<(), FacadeError> {
        match self
            .client
            .create_stream()
            .stream_name(&self.options.stream_name)
            .shard_count(self.options.shard_count)
            .send()
            .await
        {
            Ok(_) => {
                tracing::info!("created stream {}", self.options.stream_name);
                Ok(())
            }
            // Another writer won the creation race; the status poll takes it from here.
            Err(err) if code_is(&err, "ResourceInUseException") => Ok(()),
            Err(err) => Err(classify(
                "CreateStream",
                &self.options.stream_name,
                MissingAs::Nothing,
                err,
            )),
        }
    }

    async fn set_retention_period(&self) -> Result<(), FacadeError> {
        let Some(hours) = self.options.retention_period_hours else {
            return Ok(());
        };
        self.client
            .increase_stream_retention_period()
            .stream_name(&self.options.stream_name)
            .retention_period_hours(hours)
            .send()
            .await
            .map_err(|err| {
                classify(
                    "IncreaseStreamRetentionPeriod",
                    &self.options.stream_name,
                    MissingAs::Nothing,
                    err,
                )
            })?;
        Ok(())
    }

    async fn put_records(
        &self,
        records: &[KinesisRecord],
    ) -> Result<Vec<KinesisRecord>, FacadeError> {
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let entry = PutRecordsRequestEntry::builder()
                .partition_key(&record.partition_key)
                .data(Blob::new(record.message.bytes()))
                .build()
                .map_err(|err| {
                    FacadeError::new(
                        FacadeErrorKind::UnexpectedException,
                        "PutRecords",
                        self.options.stream_name.clone(),
                    )
                    .with_source(err)
                })?;
            entries.push(entry);
        }
        let output = self
            .client
            .put_records()
            .stream_name(&self.options.stream_name)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(|err| {
                classify(
                    "PutRecords",
                    &self.options.stream_name,
                    MissingAs::Nothing,
                    err,
                )
            })?;
        if output.failed_record_count().unwrap_or(0) == 0 {
            return Ok(vec![]);
        }
        // The response carries one result entry per request entry, in order; an entry with an
        // error code was not written.
        let unsent = output
            .records()
            .iter()
            .zip(records.iter())
            .filter(|(result, _)| result.error_code().is_some())
            .map(|(_, record)| record.clone())
            .collect();
        Ok(unsent)
    }
}
