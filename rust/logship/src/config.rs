use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};

use crate::DiscardAction;

///////////////////////////////////////////// WriterOptions ////////////////////////////////////////

/// Options common to every writer.  `batch_delay_ms`, `discard_threshold`, and `discard_action`
/// are live-updatable through the writer after construction; the rest are fixed.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WriterOptions {
    /// Maximum milliseconds to wait for additional messages before sending a partial batch.
    #[serde(default = "WriterOptions::default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Queue size above which the discard action applies.
    #[serde(default = "WriterOptions::default_discard_threshold")]
    pub discard_threshold: usize,
    #[serde(default)]
    pub discard_action: DiscardAction,
    /// If true, oversize messages are truncated to the service limit; otherwise dropped.
    #[serde(default = "WriterOptions::default_truncate_oversize_messages")]
    pub truncate_oversize_messages: bool,
    /// If true, no background worker runs and each add_message sends on the calling task.
    #[serde(default)]
    pub synchronous: bool,
    /// If true, dropping the writer handle requests a stop-and-drain.
    #[serde(default = "WriterOptions::default_use_shutdown_hook")]
    pub use_shutdown_hook: bool,
    /// Deadline for making the destination available at startup.
    #[serde(default = "WriterOptions::default_initialization_timeout_ms")]
    pub initialization_timeout_ms: u64,
    /// Bound on the total time spent sending a single batch, retries included.
    #[serde(default = "WriterOptions::default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Verbose diagnostic logging of batch boundaries.
    #[serde(default)]
    pub enable_batch_logging: bool,
}

impl WriterOptions {
    fn default_batch_delay_ms() -> u64 {
        2_000
    }

    fn default_discard_threshold() -> usize {
        10_000
    }

    fn default_truncate_oversize_messages() -> bool {
        true
    }

    fn default_use_shutdown_hook() -> bool {
        true
    }

    fn default_initialization_timeout_ms() -> u64 {
        60_000
    }

    fn default_send_timeout_ms() -> u64 {
        30_000
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            batch_delay_ms: WriterOptions::default_batch_delay_ms(),
            discard_threshold: WriterOptions::default_discard_threshold(),
            discard_action: DiscardAction::default(),
            truncate_oversize_messages: WriterOptions::default_truncate_oversize_messages(),
            synchronous: false,
            use_shutdown_hook: WriterOptions::default_use_shutdown_hook(),
            initialization_timeout_ms: WriterOptions::default_initialization_timeout_ms(),
            send_timeout_ms: WriterOptions::default_send_timeout_ms(),
            enable_batch_logging: false,
        }
    }
}

///////////////////////////////////////////// ClientOptions ////////////////////////////////////////

/// Remote-client configuration handed to the facade layer.  Everything is optional; unset fields
/// fall back to the SDK's environment-driven defaults.  `proxy_url` is honored through the HTTP
/// client's standard proxy environment handling.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClientOptions {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// ARN of a role to assume for all calls.
    #[serde(default)]
    pub assumed_role: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

///////////////////////////////////////// CloudWatchWriterOptions //////////////////////////////////

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CloudWatchWriterOptions {
    pub log_group: String,
    pub log_stream: String,
    /// Days to retain events in a group this writer creates.  Validated against the service's
    /// allowed values at initialization; applied best-effort.
    #[serde(default)]
    pub retention_period_days: Option<i32>,
    /// Kept for configuration compatibility with shared-stream deployments.  The current service
    /// API serializes writes without client-side sequence tokens, so this is consulted nowhere.
    #[serde(default = "CloudWatchWriterOptions::default_dedicated_writer")]
    pub dedicated_writer: bool,
}

impl CloudWatchWriterOptions {
    fn default_dedicated_writer() -> bool {
        true
    }
}

/////////////////////////////////////////// KinesisWriterOptions ///////////////////////////////////

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KinesisWriterOptions {
    pub stream_name: String,
    /// Partition key for every record, or the literal `{random}` for a fresh key per record.
    #[serde(default = "KinesisWriterOptions::default_partition_key")]
    pub partition_key: String,
    /// Shards for a stream this writer creates.
    #[serde(default = "KinesisWriterOptions::default_shard_count")]
    pub shard_count: i32,
    /// Hours to retain records in a stream this writer creates.
    #[serde(default)]
    pub retention_period_hours: Option<i32>,
    /// Create the stream if it does not exist.
    #[serde(default)]
    pub auto_create: bool,
}

impl KinesisWriterOptions {
    fn default_partition_key() -> String {
        "{random}".to_string()
    }

    fn default_shard_count() -> i32 {
        1
    }
}

///////////////////////////////////////////// SnsWriterOptions /////////////////////////////////////

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SnsWriterOptions {
    /// Topic name, resolved within the current region.  Exactly one of name and ARN must be set.
    #[serde(default)]
    pub topic_name: Option<String>,
    #[serde(default)]
    pub topic_arn: Option<String>,
    /// Subject applied to every published message.
    #[serde(default)]
    pub subject: Option<String>,
    /// Create the topic if it does not exist; only possible when configured by name.
    #[serde(default)]
    pub auto_create: bool,
}

///////////////////////////////////////////// LogshipConfig ////////////////////////////////////////

/// Top-level configuration: client options plus one section per destination a deployment ships
/// to.  Loadable from YAML with `LOGSHIP_`-prefixed environment overrides.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct LogshipConfig {
    #[serde(default)]
    pub client: ClientOptions,
    #[serde(default)]
    pub writer: WriterOptions,
    #[serde(default)]
    pub cloudwatch: Option<CloudWatchWriterOptions>,
    #[serde(default)]
    pub kinesis: Option<KinesisWriterOptions>,
    #[serde(default)]
    pub sns: Option<SnsWriterOptions>,
}

impl LogshipConfig {
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        // figment doesn't support environment variables with underscores, so nested keys use
        // "__" as the separator.
        let env = figment::Figment::from(
            Env::prefixed("LOGSHIP_").map(|k| k.as_str().replace("__", ".").into()),
        );
        let mut figment = env;
        if std::path::Path::new(path).exists() {
            figment = figment::Figment::from(Yaml::file(path)).merge(figment);
        }
        Ok(figment.extract()?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    ConfigError(#[from] figment::Error),
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
