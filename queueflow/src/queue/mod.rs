//! Thread-safe queues that connect pipeline stages.
//!
//! Two variants implement [`Queue`]:
//! - [`BoundedQueue`]: FIFO with optional capacity, graceful or immediate shutdown
//! - [`PartitionedQueue`]: conflates pending values that share a partition key

mod bounded;
mod partitioned;

pub use bounded::BoundedQueue;
pub use partitioned::{Conflater, PartitionedQueue, Partitioner};

use crate::errors::{PutError, QueueError};
use std::sync::Arc;
use std::time::Duration;

/// Type-erased control surface of a queue.
///
/// The orchestrator and stage workers shut queues down without knowing their
/// item type.
pub trait QueueControl: Send + Sync {
    /// Shuts the queue down.
    ///
    /// A graceful shutdown refuses new puts. An immediate shutdown also
    /// discards all buffered content and fails every pending or future
    /// operation. Shutdown cannot be undone.
    fn shutdown(&self, immediate: bool);

    /// Returns true once the queue has been shut down in either mode.
    fn is_shutdown(&self) -> bool;

    /// Returns the number of values currently buffered.
    fn len(&self) -> usize;

    /// Returns true if nothing is buffered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A thread-safe channel between two stages.
pub trait Queue<T>: QueueControl {
    /// Enqueues a value, waiting at most `timeout`.
    ///
    /// On rejection the value is handed back inside the [`PutError`].
    fn put(&self, value: T, timeout: Duration) -> Result<(), PutError<T>>;

    /// Dequeues a value, waiting at most `timeout`.
    fn get(&self, timeout: Duration) -> Result<T, QueueError>;

    /// Returns this queue as a type-erased control handle.
    fn control(self: Arc<Self>) -> Arc<dyn QueueControl>;
}

/// Shared handle to a queue of `T`.
pub type SharedQueue<T> = Arc<dyn Queue<T>>;
