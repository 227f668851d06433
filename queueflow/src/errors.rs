//! Error types for the queueflow runtime.
//!
//! Queue operations fail with [`QueueError`]; rejected puts hand the value
//! back through [`PutError`]. A finished pipeline run reports its outcome
//! through [`PipelineError`], which carries every captured
//! [`FailureRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Description used for the synthetic failure appended when a run aborts.
pub const EXECUTION_ABORTED: &str = "Execution was aborted";

/// Why a queue operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum QueueError {
    /// The queue is at capacity.
    #[error("queue is full")]
    Full,

    /// The queue has no content.
    #[error("queue is empty")]
    Empty,

    /// The deadline elapsed before the operation could proceed.
    #[error("queue operation timed out")]
    Timeout,

    /// The queue has been shut down and accepts no further operations.
    #[error("queue is shut down")]
    ShutDown,
}

impl QueueError {
    /// Returns true if the caller may simply try again.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::ShutDown)
    }
}

/// A rejected `put`, returning ownership of the value to the caller.
#[derive(Error)]
#[error("{error}")]
pub struct PutError<T> {
    /// The reason the value was rejected.
    pub error: QueueError,
    /// The value that was not enqueued.
    pub value: T,
}

impl<T> PutError<T> {
    /// Creates a new put error.
    pub fn new(error: QueueError, value: T) -> Self {
        Self { error, value }
    }

    /// Returns the rejected value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> From<PutError<T>> for QueueError {
    fn from(err: PutError<T>) -> Self {
        err.error
    }
}

/// Record of one captured worker failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage the failing worker belonged to. `None` for the synthetic abort entry.
    pub stage: Option<String>,
    /// Index of the failing worker within its stage.
    pub worker: Option<usize>,
    /// Error description, including the context chain.
    pub error: String,
    /// When the failure was captured.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a failure record for a worker.
    #[must_use]
    pub fn new(stage: impl Into<String>, worker: usize, error: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            worker: Some(worker),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates the synthetic entry recorded when a run was aborted.
    #[must_use]
    pub fn aborted() -> Self {
        Self {
            stage: None,
            worker: None,
            error: EXECUTION_ABORTED.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Returns true if this is the synthetic abort entry.
    #[must_use]
    pub fn is_abort_marker(&self) -> bool {
        self.stage.is_none() && self.error == EXECUTION_ABORTED
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        if let Some(ref stage) = self.stage {
            map.insert("stage".to_string(), serde_json::json!(stage));
        }
        if let Some(worker) = self.worker {
            map.insert("worker".to_string(), serde_json::json!(worker));
        }
        map.insert("error".to_string(), serde_json::json!(self.error));
        map.insert(
            "timestamp".to_string(),
            serde_json::json!(self.timestamp.to_rfc3339()),
        );
        map
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.stage, self.worker) {
            (Some(stage), Some(worker)) => {
                write!(f, "Stage '{stage}' worker {worker} failed: {}", self.error)
            }
            (Some(stage), None) => write!(f, "Stage '{stage}' failed: {}", self.error),
            _ => f.write_str(&self.error),
        }
    }
}

/// Joins failure descriptions one per line, in the given order.
#[must_use]
pub fn join_failures(failures: &[FailureRecord]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// The outcome of a pipeline run that did not succeed, plus setup errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A worker observed the stop signal. Suppresses all other reporting.
    #[error("Pipeline interrupted")]
    Interrupted,

    /// One or more workers failed.
    #[error("Exceptions occurred:\n{}", join_failures(.failures))]
    Failed {
        /// Every captured failure, in stage order, followed by the abort entry.
        failures: Vec<FailureRecord>,
    },

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker for stage '{stage}': {source}")]
    Spawn {
        /// The stage being started.
        stage: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run itself could not be driven to completion.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Returns the captured failures, if this is a [`PipelineError::Failed`].
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        match self {
            Self::Failed { failures } => failures,
            _ => &[],
        }
    }

    /// Returns true if the run was interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
