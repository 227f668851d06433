//! Bounded FIFO queue with graceful and immediate shutdown.

use super::{Queue, QueueControl};
use crate::errors::{PutError, QueueError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    Open,
    /// No new puts; buffered items stay retrievable.
    Graceful,
    /// Everything discarded; every operation fails.
    Immediate,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    state: ShutdownState,
}

/// A thread-safe FIFO queue with an optional capacity.
///
/// `put` and `get` block up to their timeout waiting for space or content and
/// fail with [`QueueError::Timeout`] when the deadline passes. A zero timeout
/// never blocks and reports [`QueueError::Full`] or [`QueueError::Empty`]
/// instead.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    /// Maximum number of buffered items. Zero means unbounded.
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items. Zero means unbounded.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                state: ShutdownState::Open,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Creates an unbounded queue.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Returns the configured capacity (zero for unbounded).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues without waiting.
    pub fn try_put(&self, value: T) -> Result<(), PutError<T>> {
        self.put_inner(value, Duration::ZERO)
    }

    /// Dequeues without waiting.
    pub fn try_get(&self) -> Result<T, QueueError> {
        self.get_inner(Duration::ZERO)
    }

    fn has_room(&self, len: usize) -> bool {
        self.capacity == 0 || len < self.capacity
    }

    fn put_inner(&self, value: T, timeout: Duration) -> Result<(), PutError<T>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock();

        loop {
            if inner.state != ShutdownState::Open {
                return Err(PutError::new(QueueError::ShutDown, value));
            }
            if self.has_room(inner.items.len()) {
                inner.items.push_back(value);
                drop(inner);
                self.not_empty.notify_one();
                return Ok(());
            }
            if timeout.is_zero() {
                return Err(PutError::new(QueueError::Full, value));
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    return Err(PutError::new(QueueError::Timeout, value));
                }
                Some(deadline) => {
                    self.not_full.wait_until(&mut inner, deadline);
                }
                None => self.not_full.wait(&mut inner),
            }
        }
    }

    fn get_inner(&self, timeout: Duration) -> Result<T, QueueError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock();

        loop {
            if inner.state == ShutdownState::Immediate {
                return Err(QueueError::ShutDown);
            }
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.state == ShutdownState::Graceful {
                return Err(QueueError::ShutDown);
            }
            if timeout.is_zero() {
                return Err(QueueError::Empty);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Err(QueueError::Timeout),
                Some(deadline) => {
                    self.not_empty.wait_until(&mut inner, deadline);
                }
                None => self.not_empty.wait(&mut inner),
            }
        }
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T: Send> QueueControl for BoundedQueue<T> {
    fn shutdown(&self, immediate: bool) {
        let mut inner = self.inner.lock();
        if immediate {
            let discarded = inner.items.len();
            inner.items.clear();
            inner.state = ShutdownState::Immediate;
            debug!(discarded, "Bounded queue shut down immediately");
        } else if inner.state == ShutdownState::Open {
            inner.state = ShutdownState::Graceful;
            debug!(buffered = inner.items.len(), "Bounded queue shut down gracefully");
        }
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.inner.lock().state != ShutdownState::Open
    }

    fn len(&self) -> usize {
        self.inner.lock().items.len()
    }
}

impl<T: Send + 'static> Queue<T> for BoundedQueue<T> {
    fn put(&self, value: T, timeout: Duration) -> Result<(), PutError<T>> {
        self.put_inner(value, timeout)
    }

    fn get(&self, timeout: Duration) -> Result<T, QueueError> {
        self.get_inner(timeout)
    }

    fn control(self: Arc<Self>) -> Arc<dyn QueueControl> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(0);
        for i in 0..5 {
            queue.put(i, SHORT).unwrap();
        }
        let drained: Vec<i32> = (0..5).map(|_| queue.get(SHORT).unwrap()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_put_times_out_when_full() {
        let queue = BoundedQueue::new(1);
        queue.put(1, SHORT).unwrap();

        let start = Instant::now();
        let err = queue.put(2, SHORT).unwrap_err();
        assert_eq!(err.error, QueueError::Timeout);
        assert_eq!(err.into_inner(), 2);
        assert!(start.elapsed() >= SHORT);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_zero_timeout_reports_full_and_empty() {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.try_get().unwrap_err(), QueueError::Empty);

        queue.try_put("a").unwrap();
        let start = Instant::now();
        let err = queue.put("b", Duration::ZERO).unwrap_err();
        assert_eq!(err.error, QueueError::Full);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_get_times_out_when_empty() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(4);
        assert_eq!(queue.get(SHORT).unwrap_err(), QueueError::Timeout);
    }

    #[test]
    fn test_blocked_get_wakes_on_put() {
        let queue = Arc::new(BoundedQueue::new(0));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get(Duration::from_secs(5)))
        };
        thread::sleep(SHORT);
        queue.put(42, SHORT).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_blocked_put_wakes_on_get() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.put(1, SHORT).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put(2, Duration::from_secs(5)).map_err(|e| e.error))
        };
        thread::sleep(SHORT);
        assert_eq!(queue.get(SHORT).unwrap(), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(queue.get(SHORT).unwrap(), 2);
    }

    #[test]
    fn test_graceful_shutdown_drains_then_fails() {
        let queue = BoundedQueue::new(0);
        queue.put(1, SHORT).unwrap();
        queue.put(2, SHORT).unwrap();
        queue.shutdown(false);

        assert!(queue.is_shutdown());
        assert_eq!(queue.put(3, SHORT).unwrap_err().error, QueueError::ShutDown);
        assert_eq!(queue.get(SHORT).unwrap(), 1);
        assert_eq!(queue.get(SHORT).unwrap(), 2);
        assert_eq!(queue.get(SHORT).unwrap_err(), QueueError::ShutDown);
    }

    #[test]
    fn test_immediate_shutdown_discards_content() {
        let queue = BoundedQueue::new(0);
        queue.put(1, SHORT).unwrap();
        queue.put(2, SHORT).unwrap();
        queue.shutdown(true);

        assert_eq!(queue.len(), 0);
        assert_eq!(queue.get(SHORT).unwrap_err(), QueueError::ShutDown);
        assert_eq!(queue.put(3, SHORT).unwrap_err().error, QueueError::ShutDown);
    }

    #[test]
    fn test_immediate_shutdown_upgrades_graceful() {
        let queue = BoundedQueue::new(0);
        queue.put(1, SHORT).unwrap();
        queue.shutdown(false);
        queue.shutdown(true);
        assert_eq!(queue.get(SHORT).unwrap_err(), QueueError::ShutDown);

        // A later graceful request does not reopen or downgrade.
        queue.shutdown(false);
        assert!(queue.is_shutdown());
        assert_eq!(queue.get(SHORT).unwrap_err(), QueueError::ShutDown);
    }

    #[test]
    fn test_shutdown_wakes_blocked_consumer() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(0));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get(Duration::from_secs(30)))
        };
        thread::sleep(SHORT);
        let start = Instant::now();
        queue.shutdown(true);
        assert_eq!(consumer.join().unwrap().unwrap_err(), QueueError::ShutDown);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_shutdown_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.put("first".to_string(), SHORT).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put("second".to_string(), Duration::from_secs(30)))
        };
        thread::sleep(SHORT);
        let start = Instant::now();
        queue.shutdown(true);

        let err = producer.join().unwrap().unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(err.error, QueueError::ShutDown);
        assert_eq!(err.into_inner(), "second");
        assert_eq!(queue.len(), 0);
    }
}
