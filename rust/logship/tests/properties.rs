use proptest::prelude::*;

use logship::{DiscardAction, LogMessage, MessageQueue};

proptest! {
    /// Truncation never exceeds the limit, never splits a UTF-8 sequence, and always yields a
    /// prefix of the original text.
    #[test]
    fn truncate_yields_a_valid_bounded_prefix(text in ".*", max_bytes in 0usize..300) {
        let original = LogMessage::new(1, text.clone());
        let mut truncated = original.clone();
        truncated.truncate(max_bytes);
        if original.size() <= max_bytes {
            prop_assert_eq!(original.text(), truncated.text());
        } else {
            prop_assert!(truncated.size() <= max_bytes);
        }
        // A str is valid UTF-8 by construction, so surviving the prefix check is the whole
        // invariant.
        prop_assert!(text.starts_with(truncated.text()));
    }

    /// Under `Oldest`, the queue retains exactly the most recent `threshold` messages.
    #[test]
    fn discard_oldest_retains_the_most_recent(count in 0usize..40, threshold in 0usize..20) {
        let queue = MessageQueue::new(threshold, DiscardAction::Oldest);
        for i in 0..count {
            queue.enqueue(LogMessage::new(i as u64, i.to_string()));
        }
        let retained = count.min(threshold);
        prop_assert_eq!(retained, queue.len());
        prop_assert_eq!((count - retained) as u64, queue.dropped());
        let mut expected = count - retained;
        while let Some(message) = queue.dequeue() {
            prop_assert_eq!(expected.to_string(), message.text());
            expected += 1;
        }
        prop_assert_eq!(count, expected);
    }

    /// requeue followed by dequeue returns the same message when nothing else intervenes.
    #[test]
    fn requeue_dequeue_round_trips(texts in proptest::collection::vec(".*", 1..8)) {
        let queue = MessageQueue::new(100, DiscardAction::None);
        for (i, text) in texts.iter().enumerate() {
            queue.enqueue(LogMessage::new(i as u64, text.clone()));
        }
        let head = queue.dequeue().unwrap();
        queue.requeue(head.clone());
        prop_assert_eq!(Some(head), queue.dequeue());
        prop_assert_eq!(texts.len() - 1, queue.len());
    }
}
