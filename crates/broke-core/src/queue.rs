use crate::{Message, MessageId};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// In-memory FIFO of messages that were handed out but not yet acknowledged.
///
/// Insertion order is age order: the head is always the oldest entry, which
/// makes it both the first candidate for eviction and the natural one to
/// redeliver. Every mutation holds the write lock for its whole scan and
/// splice, so no caller can see a half-updated sequence.
///
/// Ids are expected to be unique among entries. That is a contract on the
/// caller; the queue only refuses the sentinel id.
pub struct PendingQueue {
    messages: RwLock<VecDeque<Message>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        PendingQueue {
            messages: RwLock::new(VecDeque::new()),
        }
    }

    /// Append a message at the tail. Messages carrying the sentinel id are
    /// ignored; returns whether the message was stored.
    pub fn push(&self, message: Message) -> bool {
        if !message.is_valid() {
            return false;
        }
        self.messages.write().push_back(message);
        true
    }

    /// Remove and return the head of the queue
    pub fn shift(&self) -> Option<Message> {
        self.messages.write().pop_front()
    }

    /// Remove the first message whose id matches. A miss is not an error:
    /// the message may already have been evicted for redelivery.
    pub fn discard(&self, id: MessageId) -> bool {
        let mut messages = self.messages.write();
        match messages.iter().position(|m| m.id == id) {
            Some(index) => {
                messages.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return the oldest message whose age is at least
    /// `threshold`. At most one message leaves per call.
    pub fn purge_one(&self, threshold: Duration) -> Option<Message> {
        self.purge_one_at(threshold, Instant::now())
    }

    /// Same as [`purge_one`](Self::purge_one) against an explicit clock reading
    pub fn purge_one_at(&self, threshold: Duration, now: Instant) -> Option<Message> {
        let mut messages = self.messages.write();
        let index = messages
            .iter()
            .position(|m| m.timeout_reached_at(threshold, now))?;
        messages.remove(index)
    }

    /// Whether a message with this id is pending
    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.read().iter().any(|m| m.id == id)
    }

    /// Snapshot of the pending ids, head first
    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.read().iter().map(|m| m.id).collect()
    }

    /// Get message count
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ids(values: &[u64]) -> Vec<MessageId> {
        values.iter().copied().map(MessageId::new).collect()
    }

    #[test]
    fn test_push() {
        let queue = PendingQueue::new();
        assert!(queue.push(Message::new(1, "Ok")));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.shift().unwrap(), Message::new(1, "Ok"));
    }

    #[test]
    fn test_push_sentinel_is_ignored() {
        let queue = PendingQueue::new();
        assert!(!queue.push(Message::new(MessageId::INVALID, "nope")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shift_empty_queue() {
        let queue = PendingQueue::new();
        assert!(queue.shift().is_none());
    }

    #[test]
    fn test_discard() {
        let queue = PendingQueue::new();
        queue.push(Message::new(60, "Discard me!"));
        queue.push(Message::new(17, "I'm good here."));

        assert!(queue.discard(MessageId::new(60)));
        assert_eq!(queue.ids(), ids(&[17]));
    }

    #[test]
    fn test_discard_keeps_order() {
        let queue = PendingQueue::new();
        for id in 1..=5 {
            queue.push(Message::new(id, "x"));
        }

        assert!(queue.discard(MessageId::new(3)));
        assert_eq!(queue.ids(), ids(&[1, 2, 4, 5]));
    }

    #[test]
    fn test_discard_not_found() {
        let queue = PendingQueue::new();
        queue.push(Message::new(60, "Discard me!"));
        queue.push(Message::new(17, "I'm good here."));

        assert!(!queue.discard(MessageId::new(777)));
        assert_eq!(queue.ids(), ids(&[60, 17]));
    }

    #[test]
    fn test_discard_empty() {
        let queue = PendingQueue::new();
        assert!(!queue.discard(MessageId::new(777)));
    }

    #[test]
    fn test_purge_one_match() {
        let now = Instant::now();
        let queue = PendingQueue::new();
        queue.push(Message::with_enqueued_at(60, "Discard me!", now - Duration::from_secs(1)));
        queue.push(Message::with_enqueued_at(17, "I'm good here.", now));

        let purged = queue.purge_one_at(Duration::from_secs(1), now).unwrap();
        assert_eq!(purged.id, MessageId::new(60));
        assert_eq!(queue.ids(), ids(&[17]));
        assert!(queue.purge_one_at(Duration::from_secs(1), now).is_none());
    }

    #[test]
    fn test_purge_no_match() {
        let queue = PendingQueue::new();
        queue.push(Message::new(60, "Too young"));

        assert!(queue.purge_one(Duration::from_secs(1)).is_none());
        assert_eq!(queue.ids(), ids(&[60]));
    }

    #[test]
    fn test_purge_multiple_matches_one_per_call() {
        let now = Instant::now();
        let old = now - Duration::from_secs(1);
        let queue = PendingQueue::new();
        queue.push(Message::with_enqueued_at(60, "Discard me!", old));
        queue.push(Message::with_enqueued_at(61, "Discard me too!", old));
        queue.push(Message::with_enqueued_at(17, "I'm good here.", now));

        let threshold = Duration::from_secs(1);
        assert_eq!(queue.purge_one_at(threshold, now).unwrap().id, MessageId::new(60));
        assert_eq!(queue.ids(), ids(&[61, 17]));
        assert_eq!(queue.purge_one_at(threshold, now).unwrap().id, MessageId::new(61));
        assert_eq!(queue.ids(), ids(&[17]));
        assert!(queue.purge_one_at(threshold, now).is_none());
    }

    #[test]
    fn test_purge_empty() {
        let queue = PendingQueue::new();
        assert!(queue.purge_one(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_purge_threshold_is_inclusive() {
        let now = Instant::now();
        let queue = PendingQueue::new();
        queue.push(Message::with_enqueued_at(5, "edge", now - Duration::from_millis(50)));

        assert!(queue.purge_one_at(Duration::from_millis(50), now).is_some());
    }

    #[test]
    fn test_contains() {
        let queue = PendingQueue::new();
        queue.push(Message::new(3, "x"));
        assert!(queue.contains(MessageId::new(3)));
        assert!(!queue.contains(MessageId::new(4)));
    }

    #[test]
    fn test_concurrent_access() {
        const THREADS: usize = 16;
        const OPS: usize = 512;

        let queue = Arc::new(PendingQueue::new());
        let pushed = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let queue = queue.clone();
                let pushed = pushed.clone();
                let removed = removed.clone();
                std::thread::spawn(move || {
                    for i in 0..OPS {
                        let id = (t * OPS + i + 1) as u64;
                        match (t + i) % 4 {
                            0 | 1 => {
                                if queue.push(Message::new(id, "OK")) {
                                    pushed.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            2 => {
                                if queue.shift().is_some() {
                                    removed.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            _ => {
                                if queue.purge_one(Duration::ZERO).is_some() {
                                    removed.fetch_add(1, Ordering::SeqCst);
                                }
                                if queue.discard(MessageId::new(id - 1)) {
                                    removed.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let expected = pushed.load(Ordering::SeqCst) - removed.load(Ordering::SeqCst);
        assert_eq!(queue.len(), expected);

        let mut seen = queue.ids();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total, "duplicate ids in queue");
    }

    proptest! {
        #[test]
        fn prop_shift_is_fifo(values in proptest::collection::vec(1u64..10_000, 0..64)) {
            let queue = PendingQueue::new();
            for &id in &values {
                queue.push(Message::new(id, "p"));
            }

            let mut shifted = Vec::new();
            while let Some(message) = queue.shift() {
                shifted.push(message.id.value());
            }
            prop_assert_eq!(shifted, values);
        }

        #[test]
        fn prop_discard_missing_leaves_queue_untouched(
            count in 0u64..32,
            missing in 1000u64..2000,
        ) {
            let queue = PendingQueue::new();
            for id in 1..=count {
                queue.push(Message::new(id, "p"));
            }
            let before = queue.ids();

            prop_assert!(!queue.discard(MessageId::new(missing)));
            prop_assert_eq!(queue.ids(), before);
        }

        #[test]
        fn prop_purge_one_takes_oldest_expired(
            mut ages in proptest::collection::vec(0u64..1_000, 1..32),
            threshold in 0u64..1_000,
        ) {
            // Oldest first, as the queue would hold them after arrival-order pushes.
            ages.sort_unstable_by(|a, b| b.cmp(a));

            let now = Instant::now();
            let queue = PendingQueue::new();
            for (index, age) in ages.iter().enumerate() {
                let enqueued_at = now - Duration::from_millis(*age);
                queue.push(Message::with_enqueued_at(index as u64 + 1, "p", enqueued_at));
            }

            let threshold = Duration::from_millis(threshold);
            let expected = ages
                .iter()
                .position(|age| Duration::from_millis(*age) >= threshold)
                .map(|index| MessageId::new(index as u64 + 1));

            let purged = queue.purge_one_at(threshold, now).map(|m| m.id);
            prop_assert_eq!(purged, expected);

            let removed = usize::from(expected.is_some());
            prop_assert_eq!(queue.len(), ages.len() - removed);
        }
    }
}
