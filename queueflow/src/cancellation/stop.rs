//! Stop signal for cooperative interruption of running pipelines.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Default)]
struct Inner {
    triggered: AtomicBool,
    /// The reason for stopping (first one wins).
    reason: RwLock<Option<String>>,
}

/// An external request to stop a pipeline.
///
/// Workers check the signal each time a queue operation comes back without
/// progress. A worker that observes it marks its stage as interrupted and
/// shuts down every queue it holds. Clones share the same state. Triggering
/// is idempotent; only the first reason is kept.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    /// Creates a new, untriggered stop signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Returns true if this call triggered the signal.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        if self
            .inner
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            warn!(reason = %reason, "Stop requested");
            *self.inner.reason.write() = Some(reason);
            true
        } else {
            false
        }
    }

    /// Returns whether a stop has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Returns the stop reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("triggered", &self.is_triggered())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Triggers `signal` when the process receives Ctrl-C.
///
/// Resolves after the signal has been triggered. Returns an error if the
/// Ctrl-C handler could not be installed.
pub async fn watch_ctrl_c(signal: StopSignal) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    signal.trigger("ctrl-c");
    Ok(())
}
