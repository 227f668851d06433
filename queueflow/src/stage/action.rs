//! Actions bound to stage workers.
//!
//! Each worker of a stage runs exactly one action. A [`SourceAction`] is a
//! one-shot producer of a finite item sequence, a [`TransformAction`] maps one
//! item to one item and a [`SinkAction`] consumes items for their side effect.
//! Transform and sink actions are cheap to clone, so one action can be
//! replicated across several workers.

use std::fmt;
use std::sync::Arc;

/// Iterator driven by a source worker.
pub type SourceItems<T> = Box<dyn Iterator<Item = anyhow::Result<T>> + Send>;

type SourceFn<T> = Box<dyn FnOnce() -> SourceItems<T> + Send>;

/// A one-shot, non-restartable producer of items.
///
/// The producer closure runs on the worker thread and returns an iterator.
/// An `Err` item ends the worker with a captured failure.
pub struct SourceAction<T> {
    produce: SourceFn<T>,
}

impl<T: 'static> SourceAction<T> {
    /// Creates a source from a closure returning a fallible item sequence.
    pub fn new<F, I>(produce: F) -> Self
    where
        F: FnOnce() -> I + Send + 'static,
        I: IntoIterator<Item = anyhow::Result<T>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            produce: Box::new(move || -> SourceItems<T> { Box::new(produce().into_iter()) }),
        }
    }

    /// Creates a source that emits the given values.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::new(move || values.into_iter().map(Ok))
    }

    /// Starts the sequence. Consumes the action.
    pub(crate) fn start(self) -> SourceItems<T> {
        (self.produce)()
    }
}

impl<T> fmt::Debug for SourceAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceAction").finish_non_exhaustive()
    }
}

/// Maps one input item to one output item.
pub struct TransformAction<I, O> {
    func: Arc<dyn Fn(I) -> anyhow::Result<O> + Send + Sync>,
}

impl<I, O> TransformAction<I, O> {
    /// Creates a transform from a fallible function.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    /// Creates a transform from a function that cannot fail.
    pub fn infallible<F>(func: F) -> Self
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        Self::new(move |item| Ok(func(item)))
    }

    /// Returns `workers` copies of this action, one per worker.
    #[must_use]
    pub fn replicate(self, workers: usize) -> Vec<Self> {
        vec![self; workers]
    }

    pub(crate) fn call(&self, item: I) -> anyhow::Result<O> {
        (self.func)(item)
    }
}

impl<I, O> Clone for TransformAction<I, O> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl<I, O> fmt::Debug for TransformAction<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformAction").finish_non_exhaustive()
    }
}

/// Consumes items at the end of a pipeline.
pub struct SinkAction<I> {
    func: Arc<dyn Fn(I) -> anyhow::Result<()> + Send + Sync>,
}

impl<I> SinkAction<I> {
    /// Creates a sink from a fallible function.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    /// Creates a sink from a function that cannot fail.
    pub fn infallible<F>(func: F) -> Self
    where
        F: Fn(I) + Send + Sync + 'static,
    {
        Self::new(move |item| {
            func(item);
            Ok(())
        })
    }

    /// Returns `workers` copies of this action, one per worker.
    #[must_use]
    pub fn replicate(self, workers: usize) -> Vec<Self> {
        vec![self; workers]
    }

    pub(crate) fn call(&self, item: I) -> anyhow::Result<()> {
        (self.func)(item)
    }
}

impl<I> Clone for SinkAction<I> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl<I> fmt::Debug for SinkAction<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkAction").finish_non_exhaustive()
    }
}
