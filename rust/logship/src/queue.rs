use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::{DiscardAction, LogMessage};

fn action_to_u8(action: DiscardAction) -> u8 {
    match action {
        DiscardAction::None => 0,
        DiscardAction::Oldest => 1,
        DiscardAction::Newest => 2,
    }
}

fn action_from_u8(action: u8) -> DiscardAction {
    match action {
        0 => DiscardAction::None,
        2 => DiscardAction::Newest,
        _ => DiscardAction::Oldest,
    }
}

///////////////////////////////////////////// MessageQueue /////////////////////////////////////////

/// A bounded FIFO of LogMessage shared between producers and a single consuming writer.
/// Producers enqueue at the tail; the writer dequeues from the head and may requeue unsent
/// messages back onto the head.  After any insertion the discard policy runs: when the queue is
/// over its threshold, excess messages are removed from the head (`Oldest`) or tail (`Newest`)
/// until the queue fits.  Enqueue never blocks and never fails.
///
/// A requeued message is the first candidate for eviction under `Oldest`.
#[derive(Debug)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<LogMessage>>,
    len: AtomicUsize,
    dropped: AtomicU64,
    discard_threshold: AtomicUsize,
    discard_action: AtomicU8,
    nonempty: tokio::sync::Notify,
}

impl MessageQueue {
    pub fn new(discard_threshold: usize, discard_action: DiscardAction) -> Self {
        MessageQueue {
            messages: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            discard_threshold: AtomicUsize::new(discard_threshold),
            discard_action: AtomicU8::new(action_to_u8(discard_action)),
            nonempty: tokio::sync::Notify::new(),
        }
    }

    /// Add a message to the tail of the queue.
    pub fn enqueue(&self, message: LogMessage) {
        // Mutex poisoning.
        let mut messages = self.messages.lock().unwrap();
        messages.push_back(message);
        self.apply_discard(&mut messages);
        self.len.store(messages.len(), Ordering::Relaxed);
        drop(messages);
        self.nonempty.notify_one();
    }

    /// Put a message back at the head of the queue.  Under `Oldest` the reinserted message is
    /// itself the first to go if the queue is over threshold.
    pub fn requeue(&self, message: LogMessage) {
        // Mutex poisoning.
        let mut messages = self.messages.lock().unwrap();
        messages.push_front(message);
        self.apply_discard(&mut messages);
        self.len.store(messages.len(), Ordering::Relaxed);
        drop(messages);
        self.nonempty.notify_one();
    }

    /// Remove and return the head of the queue, if any.
    pub fn dequeue(&self) -> Option<LogMessage> {
        // Mutex poisoning.
        let mut messages = self.messages.lock().unwrap();
        let message = messages.pop_front();
        self.len.store(messages.len(), Ordering::Relaxed);
        message
    }

    /// Remove and return the head of the queue, waiting up to `timeout` for a message to arrive.
    /// Returns None on timeout.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<LogMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.dequeue() {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, self.nonempty.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Approximate under concurrent mutation, exact when quiescent.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages removed by the discard policy since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn set_discard_threshold(&self, discard_threshold: usize) {
        self.discard_threshold
            .store(discard_threshold, Ordering::Relaxed);
    }

    pub fn set_discard_action(&self, discard_action: DiscardAction) {
        self.discard_action
            .store(action_to_u8(discard_action), Ordering::Relaxed);
    }

    fn apply_discard(&self, messages: &mut VecDeque<LogMessage>) {
        let action = action_from_u8(self.discard_action.load(Ordering::Relaxed));
        if action == DiscardAction::None {
            return;
        }
        let threshold = self.discard_threshold.load(Ordering::Relaxed);
        while messages.len() > threshold {
            let dropped = match action {
                DiscardAction::Oldest => messages.pop_front(),
                DiscardAction::Newest => messages.pop_back(),
                DiscardAction::None => None,
            };
            if dropped.is_none() {
                break;
            }
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &MessageQueue) -> Vec<String> {
        let mut texts = vec![];
        while let Some(message) = queue.dequeue() {
            texts.push(message.text().to_string());
        }
        texts
    }

    #[test]
    fn fifo_order() {
        let queue = MessageQueue::new(100, DiscardAction::None);
        for i in 0..5 {
            queue.enqueue(LogMessage::new(i, i.to_string()));
        }
        assert_eq!(5, queue.len());
        assert_eq!(vec!["0", "1", "2", "3", "4"], drain(&queue));
        assert!(queue.is_empty());
    }

    #[test]
    fn requeue_goes_to_the_head() {
        let queue = MessageQueue::new(100, DiscardAction::None);
        queue.enqueue(LogMessage::new(1, "first"));
        queue.enqueue(LogMessage::new(2, "second"));
        let first = queue.dequeue().unwrap();
        queue.requeue(first);
        assert_eq!(vec!["first", "second"], drain(&queue));
    }

    #[test]
    fn discard_oldest_keeps_the_most_recent() {
        let queue = MessageQueue::new(10, DiscardAction::Oldest);
        for i in 0..20 {
            queue.enqueue(LogMessage::new(i, i.to_string()));
        }
        assert_eq!(10, queue.dropped());
        assert_eq!(10, queue.len());
        let expected = (10..20).map(|i| i.to_string()).collect::<Vec<_>>();
        assert_eq!(expected, drain(&queue));
    }

    #[test]
    fn discard_newest_keeps_the_head() {
        let queue = MessageQueue::new(3, DiscardAction::Newest);
        for i in 0..5 {
            queue.enqueue(LogMessage::new(i, i.to_string()));
        }
        assert_eq!(2, queue.dropped());
        assert_eq!(vec!["0", "1", "2"], drain(&queue));
    }

    #[test]
    fn discard_none_never_drops() {
        let queue = MessageQueue::new(1, DiscardAction::None);
        for i in 0..100 {
            queue.enqueue(LogMessage::new(i, i.to_string()));
        }
        assert_eq!(100, queue.len());
        assert_eq!(0, queue.dropped());
    }

    #[test]
    fn requeued_message_is_first_eviction_candidate_under_oldest() {
        let queue = MessageQueue::new(2, DiscardAction::Oldest);
        queue.enqueue(LogMessage::new(1, "a"));
        queue.enqueue(LogMessage::new(2, "b"));
        queue.requeue(LogMessage::new(0, "requeued"));
        assert_eq!(1, queue.dropped());
        assert_eq!(vec!["a", "b"], drain(&queue));
    }

    #[test]
    fn thresholds_are_live_updatable() {
        let queue = MessageQueue::new(100, DiscardAction::None);
        for i in 0..10 {
            queue.enqueue(LogMessage::new(i, i.to_string()));
        }
        queue.set_discard_threshold(5);
        queue.set_discard_action(DiscardAction::Oldest);
        // Policy applies on the next insertion.
        assert_eq!(10, queue.len());
        queue.enqueue(LogMessage::new(10, "10"));
        assert_eq!(5, queue.len());
        assert_eq!(6, queue.dropped());
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_timeout_returns_none_when_nothing_arrives() {
        let queue = MessageQueue::new(10, DiscardAction::Oldest);
        assert!(queue
            .dequeue_timeout(Duration::from_millis(250))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn dequeue_timeout_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MessageQueue::new(10, DiscardAction::Oldest));
        let waiter = std::sync::Arc::clone(&queue);
        let handle = tokio::spawn(async move { waiter.dequeue_timeout(Duration::from_secs(30)).await });
        tokio::task::yield_now().await;
        queue.enqueue(LogMessage::new(1, "wake"));
        let message = handle.await.unwrap();
        assert_eq!("wake", message.unwrap().text());
    }
}
