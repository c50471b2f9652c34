//! Ready queue handing finished segments from the prefetch loop to consumers.
//!
//! The queue has no hard capacity: the prefetch target is advisory and is
//! enforced by the producer's own submission policy. Consumers block on
//! [`ReadyQueue::pop`] until a segment arrives or their timeout elapses.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One finished, locally available unit of generated audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Submission order, unique for the lifetime of the process.
    pub sequence_number: u64,
    /// Requested length in seconds.
    pub duration_secs: u32,
    /// Local file holding the realized audio.
    pub path: PathBuf,
}

/// Thread-safe FIFO of ready segments.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    items: Mutex<VecDeque<Segment>>,
    available: Notify,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment to the tail. Never blocks and never rejects.
    pub fn push(&self, segment: Segment) {
        self.items.lock().push_back(segment);
        self.available.notify_one();
    }

    /// Take the oldest segment, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the timeout elapses with the queue still empty.
    pub async fn pop(&self, timeout: Duration) -> Option<Segment> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(segment) = self.items.lock().pop_front() {
                return Some(segment);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.items.lock().pop_front();
            }
        }
    }

    /// Instantaneous number of queued segments; may be stale immediately.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn segment(sequence_number: u64) -> Segment {
        Segment {
            sequence_number,
            duration_secs: 10,
            path: PathBuf::from(format!("segment_{:04}.wav", sequence_number)),
        }
    }

    #[tokio::test]
    async fn pops_in_insertion_order() {
        let queue = ReadyQueue::new();
        queue.push(segment(1));
        queue.push(segment(2));
        queue.push(segment(3));
        assert_eq!(queue.len(), 3);

        for expected in 1..=3 {
            let popped = queue.pop(Duration::from_millis(10)).await.unwrap();
            assert_eq!(popped.sequence_number, expected);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pop_on_empty_queue_returns_none_after_timeout() {
        let queue = ReadyQueue::new();
        let started = Instant::now();

        assert!(queue.pop(Duration::from_secs(3)).await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_consumer_is_woken_by_push() {
        let queue = Arc::new(ReadyQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        queue.push(segment(7));

        let popped = consumer.await.unwrap();
        assert_eq!(popped.map(|s| s.sequence_number), Some(7));
    }

    #[tokio::test]
    async fn concurrent_consumers_each_get_a_distinct_segment() {
        let queue = Arc::new(ReadyQueue::new());

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
            })
            .collect();

        for n in 1..=4 {
            queue.push(segment(n));
        }

        let mut seen = Vec::new();
        for consumer in consumers {
            seen.push(consumer.await.unwrap().unwrap().sequence_number);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }
}
