use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/////////////////////////////////////////////// LastError //////////////////////////////////////////

/// The most recent error a writer encountered, recorded as a group so readers never see a
/// message paired with another failure's timestamp.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LastError {
    pub message: String,
    pub cause: Option<String>,
    pub timestamp_ms: u64,
}

//////////////////////////////////////////// WriterStatistics //////////////////////////////////////

/// Monotonic per-writer counters.  All counters are written by the writer's own worker; producers
/// and monitoring readers may read them at any time.  `last_error` is guarded by a mutex because
/// it is a compound value.
#[derive(Debug, Default)]
pub struct WriterStatistics {
    messages_sent: AtomicU64,
    messages_requeued: AtomicU64,
    messages_discarded: AtomicU64,
    oversize_dropped: AtomicU64,
    last_batch_size: AtomicU64,
    throttled_writes: AtomicU64,
    writer_race_retries: AtomicU64,
    unrecovered_writer_race_retries: AtomicU64,
    last_error: Mutex<Option<LastError>>,
}

impl WriterStatistics {
    pub fn record_sent(&self, count: u64) {
        self.messages_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_requeued(&self, count: u64) {
        self.messages_requeued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: u64) {
        self.messages_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_oversize_dropped(&self, count: u64) {
        self.oversize_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_last_batch_size(&self, size: u64) {
        self.last_batch_size.store(size, Ordering::Relaxed);
    }

    pub fn record_throttled(&self, count: u64) {
        self.throttled_writes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_writer_race(&self, count: u64) {
        self.writer_race_retries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_unrecovered_writer_race(&self, count: u64) {
        self.unrecovered_writer_race_retries
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: impl Into<String>, cause: Option<&dyn std::fmt::Display>) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let last_error = LastError {
            message: message.into(),
            cause: cause.map(|c| c.to_string()),
            timestamp_ms,
        };
        // Mutex poisoning.
        *self.last_error.lock().unwrap() = Some(last_error);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_requeued(&self) -> u64 {
        self.messages_requeued.load(Ordering::Relaxed)
    }

    pub fn messages_discarded(&self) -> u64 {
        self.messages_discarded.load(Ordering::Relaxed)
    }

    pub fn oversize_dropped(&self) -> u64 {
        self.oversize_dropped.load(Ordering::Relaxed)
    }

    pub fn last_batch_size(&self) -> u64 {
        self.last_batch_size.load(Ordering::Relaxed)
    }

    pub fn throttled_writes(&self) -> u64 {
        self.throttled_writes.load(Ordering::Relaxed)
    }

    pub fn writer_race_retries(&self) -> u64 {
        self.writer_race_retries.load(Ordering::Relaxed)
    }

    pub fn unrecovered_writer_race_retries(&self) -> u64 {
        self.unrecovered_writer_race_retries.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<LastError> {
        // Mutex poisoning.
        self.last_error.lock().unwrap().clone()
    }
}

/////////////////////////////////////////// StatisticsSnapshot /////////////////////////////////////

/// A point-in-time copy of a writer's counters, suitable for export to any monitoring system.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct StatisticsSnapshot {
    pub messages_sent: u64,
    pub messages_requeued: u64,
    pub messages_discarded: u64,
    pub oversize_dropped: u64,
    pub messages_dropped_by_queue: u64,
    pub queued_messages: u64,
    pub last_batch_size: u64,
    pub throttled_writes: u64,
    pub writer_race_retries: u64,
    pub unrecovered_writer_race_retries: u64,
    pub last_error: Option<LastError>,
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
