//! Mutable state shared by the workers of one stage.

use super::StageRole;
use crate::errors::FailureRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Outcome {
    /// Captured failures, in worker termination order.
    failures: Vec<FailureRecord>,
    /// Set once, never cleared.
    interrupted: bool,
}

/// State shared by every worker of a stage.
#[derive(Debug)]
pub(crate) struct StageShared {
    pub(crate) name: String,
    pub(crate) role: StageRole,
    outcome: Mutex<Outcome>,
    received: AtomicU64,
    emitted: AtomicU64,
}

impl StageShared {
    pub(crate) fn new(name: String, role: StageRole) -> Self {
        Self {
            name,
            role,
            outcome: Mutex::new(Outcome::default()),
            received: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_failure(&self, record: FailureRecord) {
        self.outcome.lock().failures.push(record);
    }

    pub(crate) fn mark_interrupted(&self) {
        self.outcome.lock().interrupted = true;
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failures(&self) -> Vec<FailureRecord> {
        self.outcome.lock().failures.clone()
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.outcome.lock().interrupted
    }

    pub(crate) fn stats(&self, workers: usize) -> StageStats {
        let outcome = self.outcome.lock();
        StageStats {
            name: self.name.clone(),
            role: self.role,
            workers,
            received: self.received.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            failures: outcome.failures.len(),
            interrupted: outcome.interrupted,
        }
    }
}

/// Counters describing a stage after (or during) a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    /// Stage name.
    pub name: String,
    /// Stage role.
    pub role: StageRole,
    /// Number of workers.
    pub workers: usize,
    /// Items taken from the input queue.
    pub received: u64,
    /// Items put on the output queue, or consumed by a sink.
    pub emitted: u64,
    /// Number of captured failures.
    pub failures: usize,
    /// Whether a worker observed the stop signal.
    pub interrupted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_is_sticky() {
        let shared = StageShared::new("Pipe".to_string(), StageRole::Transform);
        assert!(!shared.interrupted());
        shared.mark_interrupted();
        shared.mark_interrupted();
        assert!(shared.interrupted());
    }

    #[test]
    fn test_stats_reflect_counters() {
        let shared = StageShared::new("Sink".to_string(), StageRole::Sink);
        shared.record_received();
        shared.record_received();
        shared.record_emitted();
        shared.record_failure(FailureRecord::new("Sink", 1, "boom"));

        let stats = shared.stats(2);
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(shared.failures()[0].worker, Some(1));
    }
}
