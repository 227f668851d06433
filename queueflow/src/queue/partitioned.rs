//! Partitioned queue that conflates pending values per key.
//!
//! Values are grouped by a partition key. All values buffered for one key
//! between two dequeues are merged into a single value by the conflater when
//! that key is dequeued. Keys are served in order of their first arrival since
//! their last dequeue.
//!
//! Unlike [`BoundedQueue`](super::BoundedQueue), this queue never waits for
//! space or content: the timeout only bounds lock acquisition, and a full or
//! empty queue is reported immediately. Graceful shutdown does not drain
//! buffered values; both operations check the shutdown flag first.

use super::{Queue, QueueControl};
use crate::errors::{PutError, QueueError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Maps a value to its partition key.
pub type Partitioner<T, K> = Box<dyn Fn(&T) -> K + Send + Sync>;

/// Merges the buffered values of one key, in arrival order, into one value.
pub type Conflater<T> = Box<dyn Fn(Vec<T>) -> T + Send + Sync>;

#[derive(Debug)]
struct Partitions<T, K> {
    /// Pending keys, FIFO by first arrival.
    keys: VecDeque<K>,
    /// Buffered values per pending key. Never empty.
    values: HashMap<K, Vec<T>>,
    /// Total number of buffered values across all keys.
    depth: usize,
}

/// A capacity-bounded queue that coalesces values sharing a partition key.
///
/// A capacity of zero means unbounded: `put` never reports
/// [`QueueError::Full`].
///
/// The timeout given to `put` and `get` bounds only the wait for the internal
/// lock. A zero or already-elapsed timeout still makes one non-blocking lock
/// attempt, so an uncontended call succeeds and a contended one fails with
/// [`QueueError::Timeout`].
pub struct PartitionedQueue<T, K> {
    /// Maximum total depth. Zero means unbounded.
    capacity: usize,
    partitioner: Partitioner<T, K>,
    conflater: Conflater<T>,
    is_shutdown: AtomicBool,
    partitions: Mutex<Partitions<T, K>>,
}

impl<T, K> PartitionedQueue<T, K>
where
    K: Eq + Hash + Clone,
{
    /// Creates a new partitioned queue.
    pub fn new<P, C>(capacity: usize, partitioner: P, conflater: C) -> Self
    where
        P: Fn(&T) -> K + Send + Sync + 'static,
        C: Fn(Vec<T>) -> T + Send + Sync + 'static,
    {
        Self {
            capacity,
            partitioner: Box::new(partitioner),
            conflater: Box::new(conflater),
            is_shutdown: AtomicBool::new(false),
            partitions: Mutex::new(Partitions {
                keys: VecDeque::new(),
                values: HashMap::new(),
                depth: 0,
            }),
        }
    }

    /// Returns the configured capacity (zero for unbounded).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of distinct keys with pending values.
    #[must_use]
    pub fn pending_keys(&self) -> usize {
        self.partitions.lock().keys.len()
    }

    fn is_full(&self, depth: usize) -> bool {
        self.capacity != 0 && depth >= self.capacity
    }

    fn put_inner(&self, value: T, timeout: Duration) -> Result<(), PutError<T>> {
        let deadline = Instant::now().checked_add(timeout);
        let key = (self.partitioner)(&value);

        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(PutError::new(QueueError::ShutDown, value));
        }
        let Some(mut partitions) = self.lock_until(deadline) else {
            return Err(PutError::new(QueueError::Timeout, value));
        };
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(PutError::new(QueueError::ShutDown, value));
        }
        if self.is_full(partitions.depth) {
            return Err(PutError::new(QueueError::Full, value));
        }

        match partitions.values.get_mut(&key) {
            Some(buffer) => buffer.push(value),
            None => {
                partitions.keys.push_back(key.clone());
                partitions.values.insert(key, vec![value]);
            }
        }
        partitions.depth += 1;
        Ok(())
    }

    fn get_inner(&self, timeout: Duration) -> Result<T, QueueError> {
        let deadline = Instant::now().checked_add(timeout);

        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(QueueError::ShutDown);
        }
        let mut partitions = self.lock_until(deadline).ok_or(QueueError::Timeout)?;
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(QueueError::ShutDown);
        }
        if partitions.depth == 0 {
            return Err(QueueError::Empty);
        }

        let key = partitions.keys.pop_front().ok_or(QueueError::Empty)?;
        let values = partitions.values.remove(&key).unwrap_or_default();
        partitions.depth -= values.len();
        Ok((self.conflater)(values))
    }

    /// Acquires the lock, giving up at `deadline`. `None` deadline waits forever.
    fn lock_until(
        &self,
        deadline: Option<Instant>,
    ) -> Option<parking_lot::MutexGuard<'_, Partitions<T, K>>> {
        match deadline {
            Some(deadline) => self.partitions.try_lock_until(deadline),
            None => Some(self.partitions.lock()),
        }
    }
}

impl<T, K> std::fmt::Debug for PartitionedQueue<T, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedQueue")
            .field("capacity", &self.capacity)
            .field("is_shutdown", &self.is_shutdown.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T, K> QueueControl for PartitionedQueue<T, K>
where
    T: Send,
    K: Eq + Hash + Clone + Send,
{
    fn shutdown(&self, immediate: bool) {
        self.is_shutdown.store(true, Ordering::SeqCst);
        if immediate {
            let mut partitions = self.partitions.lock();
            let discarded = partitions.depth;
            partitions.depth = 0;
            partitions.keys.clear();
            partitions.values.clear();
            debug!(discarded, "Partitioned queue shut down immediately");
        } else {
            debug!("Partitioned queue shut down gracefully");
        }
    }

    fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    fn len(&self) -> usize {
        self.partitions.lock().depth
    }
}

impl<T, K> Queue<T> for PartitionedQueue<T, K>
where
    T: Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
{
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
    use pretty_assertions::assert_eq;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn parity_sum_queue() -> PartitionedQueue<i64, i64> {
        PartitionedQueue::new(10, |v: &i64| v % 2, |values: Vec<i64>| values.iter().sum())
    }

    #[test]
    fn test_put_and_get_conflates_same_key() {
        let queue = parity_sum_queue();
        queue.put(1, TIMEOUT).unwrap();
        queue.put(2, TIMEOUT).unwrap();
        queue.put(3, TIMEOUT).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pending_keys(), 2);

        assert_eq!(queue.get(TIMEOUT).unwrap(), 4);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(TIMEOUT).unwrap(), 2);
        assert_eq!(queue.get(TIMEOUT).unwrap_err(), QueueError::Empty);
    }

    #[test]
    fn test_distinct_keys_pass_through_unchanged() {
        let queue = PartitionedQueue::new(
            0,
            |v: &String| v.clone(),
            |mut values: Vec<String>| values.remove(0),
        );
        for word in ["alpha", "beta", "gamma"] {
            queue.put(word.to_string(), TIMEOUT).unwrap();
        }
        let drained: Vec<String> = (0..3).map(|_| queue.get(TIMEOUT).unwrap()).collect();
        assert_eq!(drained, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_conflater_sees_arrival_order() {
        let queue = PartitionedQueue::new(
            0,
            |_: &Vec<u8>| (),
            |values: Vec<Vec<u8>>| values.concat(),
        );
        queue.put(vec![1], TIMEOUT).unwrap();
        queue.put(vec![2, 3], TIMEOUT).unwrap();
        queue.put(vec![4], TIMEOUT).unwrap();
        assert_eq!(queue.get(TIMEOUT).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_key_requeued_after_dequeue_goes_to_back() {
        let queue = PartitionedQueue::new(0, |v: &(char, u32)| v.0, |values: Vec<(char, u32)>| {
            let key = values[0].0;
            (key, values.iter().map(|v| v.1).sum())
        });
        queue.put(('a', 1), TIMEOUT).unwrap();
        queue.put(('b', 1), TIMEOUT).unwrap();
        assert_eq!(queue.get(TIMEOUT).unwrap(), ('a', 1));
        queue.put(('a', 5), TIMEOUT).unwrap();
        queue.put(('b', 2), TIMEOUT).unwrap();
        assert_eq!(queue.get(TIMEOUT).unwrap(), ('b', 3));
        assert_eq!(queue.get(TIMEOUT).unwrap(), ('a', 5));
    }

    #[test]
    fn test_put_full_fails_immediately() {
        let queue = parity_sum_queue();
        for i in 0..10 {
            queue.put(i * 2 + 1000, TIMEOUT).unwrap();
        }
        let start = Instant::now();
        let err = queue.put(10, Duration::from_secs(30)).unwrap_err();
        assert_eq!(err.error, QueueError::Full);
        assert_eq!(err.into_inner(), 10);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_full_with_distinct_keys() {
        let queue: PartitionedQueue<i64, i64> =
            PartitionedQueue::new(10, |v: &i64| *v, |values: Vec<i64>| values[0]);
        for i in 0..10 {
            queue.put(i, TIMEOUT).unwrap();
        }
        assert_eq!(queue.put(10, TIMEOUT).unwrap_err().error, QueueError::Full);
    }

    #[test]
    fn test_get_empty_fails_immediately() {
        let queue = parity_sum_queue();
        let start = Instant::now();
        assert_eq!(queue.get(Duration::from_secs(30)).unwrap_err(), QueueError::Empty);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_immediate_shutdown_clears_state() {
        let queue = parity_sum_queue();
        queue.put(1, TIMEOUT).unwrap();
        queue.put(2, TIMEOUT).unwrap();
        queue.shutdown(true);

        assert_eq!(queue.len(), 0);
        assert_eq!(queue.pending_keys(), 0);
        assert_eq!(queue.get(TIMEOUT).unwrap_err(), QueueError::ShutDown);
        assert_eq!(queue.put(3, TIMEOUT).unwrap_err().error, QueueError::ShutDown);
    }

    #[test]
    fn test_graceful_shutdown_strands_buffered_values() {
        let queue = parity_sum_queue();
        queue.put(1, TIMEOUT).unwrap();
        queue.shutdown(false);

        assert!(queue.is_shutdown());
        assert_eq!(queue.get(TIMEOUT).unwrap_err(), QueueError::ShutDown);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_lock_contention_times_out() {
        let queue = Arc::new(parity_sum_queue());
        let guard = queue.partitions.lock();
        let contender = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get(Duration::from_millis(20)))
        };
        let result = contender.join().unwrap();
        drop(guard);
        assert_eq!(result.unwrap_err(), QueueError::Timeout);
    }

    #[test]
    fn test_zero_timeout_makes_one_lock_attempt() {
        let queue = Arc::new(parity_sum_queue());
        queue.put(1, Duration::ZERO).unwrap();
        assert_eq!(queue.get(Duration::ZERO).unwrap(), 1);

        let guard = queue.partitions.lock();
        let contender = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put(2, Duration::ZERO).map_err(|e| e.error))
        };
        let result = contender.join().unwrap();
        drop(guard);
        assert_eq!(result.unwrap_err(), QueueError::Timeout);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let queue: PartitionedQueue<u32, u32> =
            PartitionedQueue::new(0, |v: &u32| *v, |values: Vec<u32>| values[0]);
        for i in 0..1_000 {
            queue.put(i, TIMEOUT).unwrap();
        }
        assert_eq!(queue.len(), 1_000);
        assert_eq!(queue.capacity(), 0);
    }

    #[test]
    fn test_depth_counts_raw_arrivals_across_threads() {
        let queue: Arc<PartitionedQueue<u32, u32>> = Arc::new(PartitionedQueue::new(
            0,
            |v: &u32| v % 3,
            |values: Vec<u32>| values.iter().sum(),
        ));
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..25 {
                        queue.put(t * 100 + i, TIMEOUT).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(queue.len(), 100);
        assert_eq!(queue.pending_keys(), 3);

        let mut total = 0;
        while let Ok(merged) = queue.get(TIMEOUT) {
            total += merged;
        }
        let expected: u32 = (0..4).flat_map(|t| (0..25).map(move |i| t * 100 + i)).sum();
        assert_eq!(total, expected);
        assert_eq!(queue.len(), 0);
    }
}
