//! Recording sources and sinks.

use crate::stage::{SinkAction, SourceAction};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Simulated per-item processing time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingDelay {
    base: Duration,
    jitter: bool,
}

impl ProcessingDelay {
    /// A fixed delay.
    #[must_use]
    pub fn fixed(base: Duration) -> Self {
        Self {
            base,
            jitter: false,
        }
    }

    /// Adds up to 25% random jitter on top of the base delay.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Sleeps the calling thread for one item.
    pub fn apply(&self) {
        if self.base.is_zero() {
            return;
        }
        let delay = if self.jitter {
            self.base.mul_f64(1.0 + 0.25 * rand::random::<f64>())
        } else {
            self.base
        };
        std::thread::sleep(delay);
    }
}

/// Records every value consumed by its sink actions.
///
/// Clones share the same record.
#[derive(Debug, Clone)]
pub struct RecordingSink<T> {
    consumed: Arc<Mutex<Vec<T>>>,
    delay: ProcessingDelay,
}

impl<T> Default for RecordingSink<T> {
    fn default() -> Self {
        Self {
            consumed: Arc::new(Mutex::new(Vec::new())),
            delay: ProcessingDelay::default(),
        }
    }
}

impl<T: Clone + Send + 'static> RecordingSink<T> {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` before recording each value.
    #[must_use]
    pub fn with_delay(mut self, delay: ProcessingDelay) -> Self {
        self.delay = delay;
        self
    }

    /// Returns `workers` sink actions feeding this recorder.
    #[must_use]
    pub fn actions(&self, workers: usize) -> Vec<SinkAction<T>> {
        let consumed = Arc::clone(&self.consumed);
        let delay = self.delay;
        SinkAction::infallible(move |item: T| {
            delay.apply();
            consumed.lock().push(item);
        })
        .replicate(workers)
    }

    /// Returns the consumed values in arrival order.
    #[must_use]
    pub fn consumed(&self) -> Vec<T> {
        self.consumed.lock().clone()
    }

    /// Returns the number of consumed values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.consumed.lock().len()
    }

    /// Returns true if nothing was consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumed.lock().is_empty()
    }
}

/// Source actions that jointly emit `0..n` exactly once.
///
/// Every worker draws the next number from a shared counter, so the values
/// are split between workers in no particular order.
#[derive(Debug, Clone)]
pub struct CountingSource {
    total: u64,
    next: Arc<AtomicU64>,
    emitted: Arc<Mutex<Vec<u64>>>,
    delay: ProcessingDelay,
}

impl CountingSource {
    /// Creates a source emitting `0..total`.
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self {
            total,
            next: Arc::new(AtomicU64::new(0)),
            emitted: Arc::new(Mutex::new(Vec::new())),
            delay: ProcessingDelay::default(),
        }
    }

    /// Sleeps for `delay` before emitting each value.
    #[must_use]
    pub fn with_delay(mut self, delay: ProcessingDelay) -> Self {
        self.delay = delay;
        self
    }

    /// Returns `workers` source actions sharing the counter.
    #[must_use]
    pub fn actions(&self, workers: usize) -> Vec<SourceAction<u64>> {
        (0..workers)
            .map(|_| {
                let source = self.clone();
                SourceAction::new(move || {
                    std::iter::from_fn(move || {
                        let value = source.next.fetch_add(1, Ordering::SeqCst);
                        if value >= source.total {
                            return None;
                        }
                        source.delay.apply();
                        source.emitted.lock().push(value);
                        Some(Ok(value))
                    })
                })
            })
            .collect()
    }

    /// Returns the values handed to the pipeline so far.
    #[must_use]
    pub fn emitted(&self) -> Vec<u64> {
        self.emitted.lock().clone()
    }
}
