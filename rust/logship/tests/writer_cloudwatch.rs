use std::sync::Arc;
use std::time::Duration;

use logship::config::{CloudWatchWriterOptions, WriterOptions};
use logship::{
    DiscardAction, FacadeErrorKind, LogMessage, LogWriter, WriterState, WriterStatistics,
};

mod common;

use common::{fast_writer_options, monotonic_messages, wait_until};
use mocks::{facade_error, MockCloudWatchFacade};

fn destination() -> CloudWatchWriterOptions {
    CloudWatchWriterOptions {
        log_group: "example".to_string(),
        log_stream: "main".to_string(),
        retention_period_days: None,
        dedicated_writer: true,
    }
}

fn writer(
    options: WriterOptions,
    facade: &Arc<MockCloudWatchFacade>,
) -> LogWriter<logship::CloudWatchBackend> {
    let stats = Arc::new(WriterStatistics::default());
    LogWriter::cloudwatch(
        options,
        destination(),
        Arc::clone(facade) as Arc<dyn logship::CloudWatchFacade>,
        stats,
    )
}

#[tokio::test]
async fn smoke_a_thousand_messages_in_few_batches() {
    let facade = Arc::new(MockCloudWatchFacade::provisioned());
    let options = WriterOptions {
        batch_delay_ms: 250,
        discard_threshold: 10_000,
        discard_action: DiscardAction::Oldest,
        ..fast_writer_options()
    };
    let writer = writer(options, &facade);
    for message in monotonic_messages(1_001) {
        writer.add_message(message).await;
    }
    writer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(30), || {
            facade.state.lock().unwrap().sent.len() == 1_001
        })
        .await
    );
    writer.stop().await;
    assert!(writer.await_termination(Duration::from_secs(10)).await);
    let state = facade.state.lock().unwrap();
    assert!(state.batch_sizes.len() <= 5, "sent in {:?}", state.batch_sizes);
    drop(state);
    let snapshot = writer.statistics();
    assert_eq!(1_001, snapshot.messages_sent);
    assert_eq!(0, snapshot.messages_discarded);
    assert_eq!(0, snapshot.queued_messages);
}

#[tokio::test]
async fn batches_arrive_sorted_by_timestamp() {
    let facade = Arc::new(MockCloudWatchFacade::provisioned());
    let writer = writer(fast_writer_options(), &facade);
    // Enqueued out of order; put_events asserts sorted input.
    writer.add_message(LogMessage::new(30, "third")).await;
    writer.add_message(LogMessage::new(10, "first")).await;
    writer.add_message(LogMessage::new(20, "second")).await;
    writer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            facade.state.lock().unwrap().sent.len() == 3
        })
        .await
    );
    let state = facade.state.lock().unwrap();
    assert_eq!("first", state.sent[0].text());
    assert_eq!("second", state.sent[1].text());
    assert_eq!("third", state.sent[2].text());
    drop(state);
    writer.stop().await;
    writer.await_termination(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn sequence_token_race_retries_and_succeeds() {
    let facade = Arc::new(MockCloudWatchFacade::provisioned());
    facade
        .state
        .lock()
        .unwrap()
        .put_failures
        .push_back(facade_error(FacadeErrorKind::InvalidSequenceToken));
    let writer = writer(fast_writer_options(), &facade);
    for message in monotonic_messages(3) {
        writer.add_message(message).await;
    }
    writer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            facade.state.lock().unwrap().sent.len() == 3
        })
        .await
    );
    let snapshot = writer.statistics();
    assert_eq!(1, snapshot.writer_race_retries);
    assert_eq!(0, snapshot.unrecovered_writer_race_retries);
    assert_eq!(3, snapshot.messages_sent);
    writer.stop().await;
    writer.await_termination(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn throttling_is_retried_without_requeue() {
    let facade = Arc::new(MockCloudWatchFacade::provisioned());
    facade
        .state
        .lock()
        .unwrap()
        .put_failures
        .push_back(facade_error(FacadeErrorKind::Throttling));
    let writer = writer(fast_writer_options(), &facade);
    for message in monotonic_messages(5) {
        writer.add_message(message).await;
    }
    writer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            facade.state.lock().unwrap().sent.len() == 5
        })
        .await
    );
    let snapshot = writer.statistics();
    assert_eq!(1, snapshot.throttled_writes);
    assert_eq!(5, snapshot.messages_sent);
    assert_eq!(0, snapshot.messages_requeued);
    writer.stop().await;
    writer.await_termination(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn already_processed_batches_are_dropped_as_success() {
    let facade = Arc::new(MockCloudWatchFacade::provisioned());
    facade
        .state
        .lock()
        .unwrap()
        .put_failures
        .push_back(facade_error(FacadeErrorKind::AlreadyProcessed));
    let writer = writer(fast_writer_options(), &facade);
    for message in monotonic_messages(4) {
        writer.add_message(message).await;
    }
    writer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            writer.statistics().messages_sent == 4
        })
        .await
    );
    // The batch counted as sent without reaching the destination a second time.
    assert!(facade.state.lock().unwrap().sent.is_empty());
    writer.stop().await;
    writer.await_termination(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn missing_stream_triggers_reinitialization() {
    let facade = Arc::new(MockCloudWatchFacade::provisioned());
    let writer = writer(fast_writer_options(), &facade);
    for message in monotonic_messages(100) {
        writer.add_message(message).await;
    }
    writer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            facade.state.lock().unwrap().sent.len() == 100
        })
        .await
    );

    // The stream vanishes; the next batch fails, reinitializes, and is resent.
    {
        let mut state = facade.state.lock().unwrap();
        state.stream_exists = false;
        state
            .put_failures
            .push_back(facade_error(FacadeErrorKind::MissingLogStream));
    }
    writer.add_message(LogMessage::new(1_700_000_001_000, "after")).await;
    assert!(
        wait_until(Duration::from_secs(10), || {
            facade.state.lock().unwrap().sent.len() == 101
        })
        .await
    );
    let state = facade.state.lock().unwrap();
    assert_eq!(1, state.stream_creates);
    drop(state);
    let snapshot = writer.statistics();
    assert_eq!(101, snapshot.messages_sent);
    assert_eq!(1, snapshot.messages_requeued);
    writer.stop().await;
    writer.await_termination(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn lazy_provisioning_creates_group_and_stream() {
    let facade = Arc::new(MockCloudWatchFacade::default());
    let options = CloudWatchWriterOptions {
        retention_period_days: Some(30),
        ..destination()
    };
    let stats = Arc::new(WriterStatistics::default());
    let writer = LogWriter::cloudwatch(
        fast_writer_options(),
        options,
        Arc::clone(&facade) as Arc<dyn logship::CloudWatchFacade>,
        stats,
    );
    writer.add_message(LogMessage::now("hello")).await;
    writer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            facade.state.lock().unwrap().sent.len() == 1
        })
        .await
    );
    let state = facade.state.lock().unwrap();
    assert_eq!(1, state.group_creates);
    assert_eq!(1, state.stream_creates);
    assert_eq!(1, state.retention_calls);
    drop(state);
    writer.stop().await;
    writer.await_termination(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn fatal_initialization_error_stops_the_writer() {
    let facade = Arc::new(MockCloudWatchFacade::default());
    facade
        .state
        .lock()
        .unwrap()
        .find_group_failures
        .push_back(facade_error(FacadeErrorKind::InvalidConfiguration));
    let writer = writer(fast_writer_options(), &facade);
    writer.add_message(LogMessage::now("doomed")).await;
    writer.start().await.unwrap();
    assert!(writer.await_termination(Duration::from_secs(10)).await);
    assert_eq!(WriterState::Stopped, writer.state());
    let snapshot = writer.statistics();
    assert_eq!(0, snapshot.messages_sent);
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn stop_drains_queued_messages() {
    let facade = Arc::new(MockCloudWatchFacade::provisioned());
    let writer = writer(
        WriterOptions {
            batch_delay_ms: 5_000,
            ..fast_writer_options()
        },
        &facade,
    );
    writer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            writer.state() == WriterState::Ready
        })
        .await
    );
    for message in monotonic_messages(10) {
        writer.add_message(message).await;
    }
    writer.stop().await;
    assert!(writer.await_termination(Duration::from_secs(15)).await);
    assert_eq!(10, writer.statistics().messages_sent);
}
