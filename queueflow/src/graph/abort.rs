//! Graph-wide abort on the first worker failure.

use crate::queue::QueueControl;
use crate::stage::ErrorReporter;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

#[derive(Default)]
struct AbortInner {
    aborted: bool,
    queues: Vec<Arc<dyn QueueControl>>,
}

/// Wraps the caller's error reporter for one graph run.
///
/// Every stage reports through the same wrapper. Each report marks the run as
/// aborted, forwards the message to the caller's reporter and immediately
/// shuts down every queue in the graph.
pub(crate) struct AbortSwitch {
    inner: Mutex<AbortInner>,
    reporter: ErrorReporter,
}

impl AbortSwitch {
    pub(crate) fn new(reporter: ErrorReporter) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(AbortInner::default()),
            reporter,
        })
    }

    pub(crate) fn register_queue(&self, queue: Arc<dyn QueueControl>) {
        self.inner.lock().queues.push(queue);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }

    /// Returns a reporter that routes through this switch.
    pub(crate) fn reporter(self: &Arc<Self>) -> ErrorReporter {
        let switch = Arc::clone(self);
        Arc::new(move |message: &str| switch.report(message))
    }

    fn report(&self, message: &str) {
        {
            let mut inner = self.inner.lock();
            if !inner.aborted {
                inner.aborted = true;
                warn!("Aborting pipeline after worker failure");
            }
        }
        if catch_unwind(AssertUnwindSafe(|| (self.reporter)(message))).is_err() {
            warn!("Error reporter panicked");
        }
        self.shutdown_all(true);
    }

    /// Shuts down every registered queue.
    pub(crate) fn shutdown_all(&self, immediate: bool) {
        let queues = self.inner.lock().queues.clone();
        for queue in queues {
            queue.shutdown(immediate);
        }
    }
}
