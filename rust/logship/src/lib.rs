#![doc = include_str!("../README.md")]

use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;

mod cloudwatch;
mod facade;
mod kinesis;
mod queue;
mod retry;
mod sns;
mod stats;
mod writer;

pub use cloudwatch::CloudWatchBackend;
pub use facade::{
    CloudWatchFacade, FacadeError, FacadeErrorKind, KinesisFacade, KinesisRecord, SnsFacade,
    StreamStatus,
};
pub use kinesis::KinesisBackend;
pub use queue::MessageQueue;
pub use retry::RetryManager;
pub use sns::SnsBackend;
pub use stats::{LastError, StatisticsSnapshot, WriterStatistics};
pub use writer::{LogWriter, WriterBackend, WriterError};

///////////////////////////////////////////// LogMessage ///////////////////////////////////////////

/// A LogMessage is a timestamped, UTF-8 encoded log record.  The timestamp is milliseconds since
/// the epoch.  Messages are immutable after construction except for a single in-place truncation
/// applied by the oversize policy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogMessage {
    timestamp_ms: u64,
    text: String,
}

impl LogMessage {
    pub fn new(timestamp_ms: u64, text: impl Into<String>) -> Self {
        LogMessage {
            timestamp_ms,
            text: text.into(),
        }
    }

    /// Construct a message stamped with the current wallclock time.
    pub fn now(text: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        LogMessage::new(timestamp_ms, text)
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The UTF-8 encoding of the text.  `size` is the length of these bytes, which is what every
    /// service limit is measured against.
    pub fn bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn size(&self) -> usize {
        self.text.len()
    }

    /// Shorten the message to at most `max_bytes` bytes without splitting a UTF-8 sequence.  Scan
    /// backward from `max_bytes` past continuation bytes; a lead byte whose sequence would be cut
    /// is dropped as well.  The text remains a valid prefix of the original.
    pub fn truncate(&mut self, max_bytes: usize) {
        if self.text.len() <= max_bytes {
            return;
        }
        let bytes = self.text.as_bytes();
        let mut end = max_bytes;
        while end > 0 && bytes[end] & 0b1100_0000 == 0b1000_0000 {
            end -= 1;
        }
        self.text.truncate(end);
    }
}

//////////////////////////////////////////// DiscardAction /////////////////////////////////////////

/// What to do when the queue exceeds its discard threshold.  `Oldest` drops from the head of the
/// queue, `Newest` drops from the tail, `None` never drops.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum DiscardAction {
    None,
    #[default]
    Oldest,
    Newest,
}

///////////////////////////////////////////// WriterState //////////////////////////////////////////

/// Lifecycle of a writer.  Created -> Initializing -> Ready <-> ShuttingDown -> Stopped.  A failed
/// initialization transitions directly to Stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriterState {
    Created,
    Initializing,
    Ready,
    ShuttingDown,
    Stopped,
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
