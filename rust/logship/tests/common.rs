#![allow(dead_code)]

use std::time::Duration;

use logship::config::WriterOptions;
use logship::LogMessage;

/// Poll `condition` every 10ms until it holds or `timeout` passes.  Returns the final answer.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn fast_writer_options() -> WriterOptions {
    WriterOptions {
        batch_delay_ms: 50,
        send_timeout_ms: 5_000,
        initialization_timeout_ms: 5_000,
        ..WriterOptions::default()
    }
}

pub fn monotonic_messages(count: usize) -> Vec<LogMessage> {
    (0..count)
        .map(|i| LogMessage::new(1_700_000_000_000 + i as u64, format!("message-{}", i)))
        .collect()
}
