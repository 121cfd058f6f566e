use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;
use tracing::trace;

/// Error returned when pushing to a queue that has been shut down.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue '{0}' is closed")]
pub struct QueueClosed(pub String);

struct QueueState<T> {
    items: VecDeque<T>,
    accepting: bool,
    closed: bool,
}

enum PushAttempt<T> {
    Accepted,
    Paused(T),
}

/// Bounded FIFO hand-off channel between two pipeline stages.
///
/// Flow control uses two depth thresholds instead of one: once the queue
/// fills to the high watermark, producers are paused until consumers drain
/// it below the low watermark. The gap between the two thresholds keeps
/// producers from flapping between accepted and rejected at a single
/// boundary depth.
///
/// `close` wakes every blocked producer and consumer; closed queues refuse
/// pushes and hand out their remaining items until empty.
pub struct StageQueue<T> {
    name: String,
    high: usize,
    low: usize,
    state: Mutex<QueueState<T>>,
    space: Notify,
    ready: Notify,
}

impl<T> StageQueue<T> {
    /// Create a queue that pauses producers at `high` items and resumes
    /// them once drained below `low`.
    pub fn new(name: &str, high: usize, low: usize) -> Self {
        let high = high.max(1);
        let low = low.clamp(1, high);
        Self {
            name: name.to_string(),
            high,
            low,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                accepting: true,
                closed: false,
            }),
            space: Notify::new(),
            ready: Notify::new(),
        }
    }

    /// One admission attempt. Hands the item back when producers are
    /// paused instead of waiting for space.
    async fn try_push(&self, item: T) -> Result<PushAttempt<T>, QueueClosed> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueClosed(self.name.clone()));
        }
        if !state.accepting {
            return Ok(PushAttempt::Paused(item));
        }
        state.items.push_back(item);
        if state.items.len() >= self.high {
            state.accepting = false;
            trace!(queue = %self.name, depth = state.items.len(), "high watermark reached, pausing producers");
        }
        self.ready.notify_one();
        Ok(PushAttempt::Accepted)
    }

    /// Append an item, blocking while the queue is above its high
    /// watermark. Never drops: the item is either enqueued or returned
    /// with a `QueueClosed` error.
    pub async fn push(&self, mut item: T) -> Result<(), QueueClosed> {
        loop {
            let space = self.space.notified();
            match self.try_push(item).await? {
                PushAttempt::Accepted => return Ok(()),
                PushAttempt::Paused(returned) => {
                    item = returned;
                    space.await;
                }
            }
        }
    }

    /// Bounded-wait push. `Ok(None)` means the item was enqueued;
    /// `Ok(Some(item))` hands the item back after the queue stayed
    /// paused for the whole wait, so the caller can yield to its own
    /// consumers instead of blocking a pipeline cycle.
    pub async fn push_timeout(&self, mut item: T, wait: Duration) -> Result<Option<T>, QueueClosed> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let space = self.space.notified();
            match self.try_push(item).await? {
                PushAttempt::Accepted => return Ok(None),
                PushAttempt::Paused(returned) => {
                    item = returned;
                    if tokio::time::timeout_at(deadline, space).await.is_err() {
                        return Ok(Some(item));
                    }
                }
            }
        }
    }

    /// Non-blocking pop.
    pub async fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock().await;
        let item = state.items.pop_front();
        if item.is_some() && !state.accepting && state.items.len() < self.low {
            state.accepting = true;
            trace!(queue = %self.name, depth = state.items.len(), "drained below low watermark, resuming producers");
            self.space.notify_waiters();
        }
        item
    }

    /// Blocking pop with a bounded wait. Returns `None` on timeout or when
    /// the queue is closed and empty.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<T> {
        let deadline = tokio::time::timeout(wait, async {
            loop {
                let ready = self.ready.notified();
                if let Some(item) = self.try_pop().await {
                    return Some(item);
                }
                if self.is_closed().await {
                    return None;
                }
                ready.await;
            }
        });
        deadline.await.ok().flatten()
    }

    /// Mark the queue closed and wake every blocked caller.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        self.space.notify_waiters();
        self.ready.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    #[cfg(test)]
    pub async fn is_accepting(&self) -> bool {
        self.state.lock().await.accepting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = StageQueue::new("test", 10, 5);

        queue.push(1).await.unwrap();
        queue.push(2).await.unwrap();
        queue.push(3).await.unwrap();

        assert_eq!(queue.try_pop().await, Some(1));
        assert_eq!(queue.try_pop().await, Some(2));
        assert_eq!(queue.try_pop().await, Some(3));
        assert_eq!(queue.try_pop().await, None);
    }

    #[tokio::test]
    async fn test_watermark_hysteresis() {
        let queue = Arc::new(StageQueue::new("test", 4, 2));

        for i in 0..4 {
            queue.push(i).await.unwrap();
        }
        assert!(!queue.is_accepting().await);

        // A push against the full queue must block until drained below
        // the low watermark, and the blocked item must not be lost.
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(99).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        // One pop leaves 3 items, still at or above the low watermark.
        assert_eq!(queue.try_pop().await, Some(0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        // Draining below the low watermark resumes producers.
        assert_eq!(queue.try_pop().await, Some(1));
        assert_eq!(queue.try_pop().await, Some(2));
        producer.await.unwrap().unwrap();

        // Nothing was dropped during the pause/resume cycle.
        assert_eq!(queue.try_pop().await, Some(3));
        assert_eq!(queue.try_pop().await, Some(99));
        assert_eq!(queue.try_pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_timeout_returns_pushed_item() {
        let queue = Arc::new(StageQueue::new("test", 10, 5));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_timeout(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push("item").await.unwrap();

        assert_eq!(consumer.await.unwrap(), Some("item"));
    }

    #[tokio::test]
    async fn test_pop_timeout_elapses_on_empty_queue() {
        let queue: StageQueue<u32> = StageQueue::new("test", 10, 5);
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn test_push_timeout_hands_item_back_on_saturated_queue() {
        let queue = StageQueue::new("test", 2, 1);
        queue.push(1).await.unwrap();
        queue.push(2).await.unwrap();

        // No consumer runs, so the bounded wait must elapse and the
        // item must come back instead of being lost or enqueued.
        let returned = queue
            .push_timeout(3, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(returned, Some(3));
        assert_eq!(queue.len().await, 2);

        // Once drained below the low watermark the same call succeeds.
        assert_eq!(queue.try_pop().await, Some(1));
        assert_eq!(queue.try_pop().await, Some(2));
        let returned = queue
            .push_timeout(3, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(returned, None);
        assert_eq!(queue.try_pop().await, Some(3));
    }

    #[tokio::test]
    async fn test_push_timeout_resumes_when_consumer_drains() {
        let queue = Arc::new(StageQueue::new("test", 2, 1));
        queue.push(1).await.unwrap();
        queue.push(2).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push_timeout(3, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(queue.try_pop().await, Some(1));
        assert_eq!(queue.try_pop().await, Some(2));

        assert_eq!(producer.await.unwrap().unwrap(), None);
        assert_eq!(queue.try_pop().await, Some(3));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_callers() {
        let queue: Arc<StageQueue<u32>> = Arc::new(StageQueue::new("test", 2, 1));
        queue.push(1).await.unwrap();
        queue.push(2).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(3).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close().await;

        assert!(producer.await.unwrap().is_err());
        assert!(queue.push(4).await.is_err());

        // Remaining items are still handed out after close.
        assert_eq!(queue.try_pop().await, Some(1));
        assert_eq!(queue.try_pop().await, Some(2));
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)).await, None);
    }
}
