//! Execution graphs: a source, zero or more transforms and a sink joined by queues.
//!
//! An [`ExecutionGraph`] is built with [`PipelineBuilder`] and run once.
//! Running it:
//!
//! 1. starts every stage,
//! 2. waits for each stage in pipeline order, closing its output queue once
//!    the next stage has drained it,
//! 3. aggregates interruption and failures from every stage.
//!
//! All stages report failures through one shared wrapper. The first report
//! marks the run as aborted and every report shuts down all graph queues
//! immediately, so the remaining workers wind down promptly.

mod abort;
mod builder;

pub use builder::{PipelineBuilder, StageChain};

use crate::cancellation::{watch_ctrl_c, StopSignal};
use crate::config::PipelineConfig;
use crate::errors::{FailureRecord, PipelineError};
use crate::queue::QueueControl;
use crate::stage::{RunningStage, Stage, StageStats};
use abort::AbortSwitch;
use builder::Wiring;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Upper bound on the pause between drain checks.
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique id of this run, also recorded on the `pipeline` span.
    pub run_id: Uuid,
    /// Pipeline name from the configuration.
    pub name: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Per-stage counters, in pipeline order.
    pub stages: Vec<StageStats>,
}

impl RunSummary {
    /// Returns the counters of the named stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageStats> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the number of items the sink consumed.
    #[must_use]
    pub fn items_consumed(&self) -> u64 {
        self.stages.last().map_or(0, |s| s.emitted)
    }
}

/// A fully wired pipeline, ready to run once.
pub struct ExecutionGraph {
    config: PipelineConfig,
    stop: StopSignal,
    abort: Arc<AbortSwitch>,
    stages: Vec<Stage>,
    queues: Vec<Arc<dyn QueueControl>>,
    problems: Vec<String>,
}

impl ExecutionGraph {
    fn from_wiring(wiring: Wiring) -> Self {
        Self {
            config: wiring.config,
            stop: wiring.stop,
            abort: wiring.abort,
            stages: wiring.stages,
            queues: wiring.queues,
            problems: wiring.problems,
        }
    }

    /// Returns the stop signal observed by every worker.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Returns the stage names in pipeline order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Runs the pipeline to completion on the calling thread.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Config`] if the configuration or wiring is invalid
    /// - [`PipelineError::Spawn`] if a worker thread cannot be created
    /// - [`PipelineError::Interrupted`] if any worker observed the stop signal
    /// - [`PipelineError::Failed`] if any worker failed
    pub fn run(self) -> Result<RunSummary, PipelineError> {
        self.config.validate()?;
        if !self.problems.is_empty() {
            return Err(PipelineError::Config(self.problems.join("; ")));
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", name = %self.config.name, %run_id);
        let _entered = span.enter();

        let started_at = Utc::now();
        let clock = Instant::now();
        info!(stages = self.stages.len(), "Starting pipeline");

        let mut running: Vec<RunningStage> = Vec::with_capacity(self.stages.len());
        for stage in self.stages {
            match stage.start() {
                Ok(stage) => running.push(stage),
                Err(err) => {
                    error!(error = %err, "Pipeline failed to start");
                    self.abort.shutdown_all(true);
                    return Err(err);
                }
            }
        }

        let poll_timeout = self.config.poll_timeout();
        for index in 0..running.len() {
            running[index].wait_for_completion();
            let (Some(queue), Some(consumer)) = (self.queues.get(index), running.get(index + 1))
            else {
                continue;
            };
            close_when_drained(queue.as_ref(), consumer, poll_timeout, &self.stop);
        }

        let interrupted = running.iter().any(RunningStage::interrupted);
        let mut failures: Vec<FailureRecord> =
            running.iter().flat_map(RunningStage::failures).collect();
        if self.abort.is_aborted() {
            failures.push(FailureRecord::aborted());
        }
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        if interrupted {
            warn!(
                duration_ms,
                reason = ?self.stop.reason(),
                "Pipeline interrupted"
            );
            return Err(PipelineError::Interrupted);
        }
        if !failures.is_empty() {
            error!(duration_ms, failures = failures.len(), "Pipeline failed");
            return Err(PipelineError::Failed { failures });
        }

        let stages: Vec<StageStats> = running.iter().map(RunningStage::stats).collect();
        info!(duration_ms, "Pipeline completed");
        Ok(RunSummary {
            run_id,
            name: self.config.name,
            started_at,
            duration_ms,
            stages,
        })
    }

    /// Runs the pipeline on tokio's blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionGraph::run`], plus [`PipelineError::Internal`] if
    /// the blocking task could not be joined.
    pub async fn run_async(self) -> Result<RunSummary, PipelineError> {
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| self.run()))
            .await
            .map_err(|err| PipelineError::Internal(format!("pipeline task failed: {err}")))?
    }

    /// Runs the pipeline like [`ExecutionGraph::run_async`], triggering the
    /// stop signal when the process receives Ctrl-C.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionGraph::run_async`]. A Ctrl-C during the run yields
    /// [`PipelineError::Interrupted`].
    pub async fn run_until_signal(self) -> Result<RunSummary, PipelineError> {
        let stop = self.stop.clone();
        let watcher = tokio::spawn(
            async move {
                if let Err(err) = watch_ctrl_c(stop).await {
                    warn!(error = %err, "Could not install Ctrl-C handler");
                }
            }
            .instrument(Span::current()),
        );
        let result = self.run_async().await;
        watcher.abort();
        result
    }
}

impl std::fmt::Debug for ExecutionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGraph")
            .field("name", &self.config.name)
            .field("stages", &self.stage_names())
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

/// Waits until `consumer` has drained `queue`, then closes it gracefully.
///
/// Stops waiting early if the queue was already shut down, a stop was
/// requested, or every worker of `consumer` has already exited.
fn close_when_drained(
    queue: &dyn QueueControl,
    consumer: &RunningStage,
    poll_timeout: Duration,
    stop: &StopSignal,
) {
    let pause = poll_timeout.min(DRAIN_CHECK_INTERVAL);
    while !queue.is_shutdown() && !queue.is_empty() && !stop.is_triggered() {
        if consumer.is_finished() {
            warn!(
                stage = %consumer.name(),
                pending = queue.len(),
                "Consumer exited before draining its input"
            );
            break;
        }
        std::thread::sleep(pause);
    }
    debug!(pending = queue.len(), "Closing queue");
    queue.shutdown(false);
}
