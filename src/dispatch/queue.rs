//! Thread-safe test queue shared by concurrent worker loops.
//!
//! The queue tracks two counts: the visible items waiting to run, and the
//! in-flight count (items handed to a worker but not yet marked complete).
//! Termination is driven by the in-flight count, not the visible count: a
//! worker that is about to requeue a retry may insert a new item at exactly
//! the moment a sibling is deciding whether the queue is exhausted. Because
//! [`TestQueue::add`] increments the in-flight count before the original
//! item is marked complete, the last-item race cannot release a consumer
//! early.
//!
//! # Example
//!
//! ```no_run
//! use fanout::dispatch::{TestItem, TestQueue};
//!
//! # async fn example() {
//! let queue = TestQueue::new(vec![TestItem::new("test_add"), TestItem::new("test_sub")]);
//!
//! while let Some(item) = queue.take().await {
//!     // ... run the test ...
//!     queue.mark_complete();
//! }
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// A pending test plus its attempt counter.
///
/// One item is created per logical test when a queue is populated; a retry
/// creates a fresh item carrying the retry token and the incremented
/// attempt count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestItem {
    test: String,
    attempts: usize,
}

impl TestItem {
    /// Creates a first-attempt item for the given test identifier.
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            attempts: 0,
        }
    }

    /// Creates a retry item from a runner-supplied token.
    pub fn retry(token: RetryToken, attempts: usize) -> Self {
        Self {
            test: token.into_inner(),
            attempts,
        }
    }

    /// The opaque test identifier.
    pub fn test(&self) -> &str {
        &self.test
    }

    /// Number of attempts completed before this one.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

/// Marker for the unfinished portion of a test that should be resubmitted
/// as a new attempt. Supplied by the single-test runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryToken(String);

impl RetryToken {
    /// Wraps a test identifier (or sub-portion identifier) as a retry token.
    pub fn new(test: impl Into<String>) -> Self {
        Self(test.into())
    }

    /// Consumes the token, returning the identifier to resubmit.
    pub fn into_inner(self) -> String {
        self.0
    }
}

struct QueueState {
    items: VecDeque<TestItem>,
    in_flight: usize,
}

/// A thread-safe collection of pending tests with in-flight accounting.
///
/// Multiple worker loops consume from one queue concurrently. [`take`]
/// blocks until an item is available or every handed-out item has been
/// marked complete; once the in-flight count reaches zero the release is
/// sticky; no consumer ever blocks on this queue again.
///
/// [`take`]: TestQueue::take
pub struct TestQueue {
    state: Mutex<QueueState>,
    // Signals "item available" or "all items handled"; waiters re-check
    // state under the lock to tell the two apart.
    signal: Notify,
}

impl TestQueue {
    /// Creates a queue pre-loaded with the given items.
    pub fn new(items: impl IntoIterator<Item = TestItem>) -> Self {
        let queue = Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                in_flight: 0,
            }),
            signal: Notify::new(),
        };
        for item in items {
            queue.add(item);
        }
        queue
    }

    /// Inserts an item and wakes a waiting consumer.
    ///
    /// The in-flight count is incremented here, before any completion
    /// decrement for the item that triggered a retry can run.
    pub fn add(&self, item: TestItem) {
        {
            let mut state = self.state.lock().unwrap();
            state.items.push_back(item);
            state.in_flight += 1;
        }
        self.signal.notify_waiters();
    }

    /// Removes and returns the head item, waiting if none is visible yet.
    ///
    /// Returns `None` exactly when the in-flight count has reached zero.
    /// If another consumer wins the race for the only visible item, the
    /// caller re-blocks rather than returning a spurious `None`.
    pub async fn take(&self) -> Option<TestItem> {
        let notified = self.signal.notified();
        tokio::pin!(notified);
        loop {
            // Register for wakeups before checking state so a notify
            // between the check and the await is not lost.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if state.in_flight == 0 {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }
            notified.as_mut().await;
            notified.set(self.signal.notified());
        }
    }

    /// Marks one previously taken item as fully handled.
    ///
    /// Must be called exactly once per item returned by [`take`], including
    /// items that were requeued after a failure. When the in-flight count
    /// reaches zero all blocked consumers are released permanently.
    ///
    /// [`take`]: TestQueue::take
    pub fn mark_complete(&self) {
        let done = {
            let mut state = self.state.lock().unwrap();
            debug_assert!(state.in_flight > 0, "mark_complete without a matching take");
            state.in_flight -= 1;
            state.in_flight == 0
        };
        if done {
            self.signal.notify_waiters();
        }
    }

    /// Number of visible (not in-flight) items.
    ///
    /// For post-run auditing only; control decisions based on this count
    /// would race with concurrent consumers.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// Returns true if no items are visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current in-flight count (taken but not yet marked complete).
    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_take_is_fifo() {
        let queue = TestQueue::new(vec![
            TestItem::new("a"),
            TestItem::new("b"),
            TestItem::new("c"),
        ]);

        assert_eq!(queue.take().await.unwrap().test(), "a");
        assert_eq!(queue.take().await.unwrap().test(), "b");
        assert_eq!(queue.take().await.unwrap().test(), "c");
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none_immediately() {
        let queue = TestQueue::new(Vec::new());
        assert_eq!(queue.take().await, None);
    }

    #[tokio::test]
    async fn test_no_spurious_none_while_in_flight() {
        let queue = TestQueue::new(vec![TestItem::new("a")]);
        let item = queue.take().await.unwrap();
        assert_eq!(item.test(), "a");
        assert_eq!(queue.in_flight(), 1);

        // Queue is visibly empty but the item is still in flight, so a
        // second take must block rather than return None.
        let mut take = tokio_test::task::spawn(queue.take());
        assert!(take.poll().is_pending());

        queue.mark_complete();
        assert_eq!(take.await, None);
    }

    #[tokio::test]
    async fn test_retry_insert_before_completion_keeps_queue_open() {
        let queue = TestQueue::new(vec![TestItem::new("a")]);
        let item = queue.take().await.unwrap();

        // A retry is enqueued before the original is marked complete; the
        // in-flight count never touches zero, so the queue stays open.
        queue.add(TestItem::retry(RetryToken::new("a"), item.attempts() + 1));
        queue.mark_complete();

        let retried = queue.take().await.unwrap();
        assert_eq!(retried.test(), "a");
        assert_eq!(retried.attempts(), 1);
        queue.mark_complete();

        assert_eq!(queue.take().await, None);
    }

    #[tokio::test]
    async fn test_done_signal_is_sticky_for_all_consumers() {
        let queue = Arc::new(TestQueue::new(vec![TestItem::new("a")]));

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            waiters.push(tokio::spawn(async move { queue.take().await }));
        }

        // Exactly one waiter gets the item; drain it so the others see the
        // terminal state once we mark it complete.
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.mark_complete();

        let mut got_item = 0;
        for waiter in waiters {
            match waiter.await.unwrap() {
                Some(item) => {
                    assert_eq!(item.test(), "a");
                    got_item += 1;
                }
                None => {}
            }
        }
        assert_eq!(got_item, 1);

        // Sticky: takes after the release return None without blocking.
        assert_eq!(queue.take().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_drain_without_duplicates() {
        let queue = Arc::new(TestQueue::new(
            (0..50).map(|i| TestItem::new(format!("test{i}"))),
        ));

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = queue.take().await {
                    seen.push(item.test().to_string());
                    queue.mark_complete();
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.in_flight(), 0);
    }
}
