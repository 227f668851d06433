//! Worker-pool stages.
//!
//! A stage is a named pool of worker threads sharing one role. Each worker
//! runs one action in a loop: take an item from the input queue, apply the
//! action, put the result on the output queue. A stage without an input queue
//! is a source, one without an output queue is a sink.
//!
//! [`Stage::start`] spawns one thread per action and returns a
//! [`RunningStage`] guard. The guard joins every worker when it is dropped,
//! so no worker outlives its stage on any exit path.

mod action;
mod state;
mod worker;

pub use action::{SinkAction, SourceAction, SourceItems, TransformAction};
pub use state::StageStats;

use crate::cancellation::StopSignal;
use crate::errors::{FailureRecord, PipelineError};
use crate::queue::{QueueControl, SharedQueue};
use serde::{Deserialize, Serialize};
use state::StageShared;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, info_span, Span};
use worker::{WorkerBody, WorkerContext, WorkerExit};

/// Callback receiving a description of every worker failure.
pub type ErrorReporter = Arc<dyn Fn(&str) + Send + Sync>;

/// The role a stage plays in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageRole {
    /// Produces items; has only an output queue.
    Source,
    /// Maps items; has an input and an output queue.
    Transform,
    /// Consumes items; has only an input queue.
    Sink,
}

impl std::fmt::Display for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Transform => write!(f, "transform"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// Settings shared by every worker of a stage.
#[derive(Clone)]
pub struct StageSettings {
    /// How long one queue operation may block before the worker rechecks
    /// for shutdown and interruption.
    pub poll_timeout: Duration,
    /// Receives a description of every worker failure.
    pub reporter: ErrorReporter,
    /// External stop request.
    pub stop: StopSignal,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl StageSettings {
    /// Creates settings with the given reporter and default timings.
    pub fn new<F>(reporter: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self::with_reporter(Arc::new(reporter))
    }

    /// Creates settings from a shared reporter.
    #[must_use]
    pub fn with_reporter(reporter: ErrorReporter) -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            reporter,
            stop: StopSignal::new(),
            thread_name_prefix: "queueflow".to_string(),
        }
    }

    /// Sets the poll timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the stop signal.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl std::fmt::Debug for StageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSettings")
            .field("poll_timeout", &self.poll_timeout)
            .field("stop", &self.stop)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .finish_non_exhaustive()
    }
}

/// An idle stage: workers bound to their actions and queues, not yet running.
pub struct Stage {
    name: String,
    role: StageRole,
    workers: Vec<WorkerBody>,
    queues: Vec<Arc<dyn QueueControl>>,
    settings: StageSettings,
}

impl Stage {
    /// Creates a source stage: one worker per action, pushing into `output`.
    pub fn source<T>(
        name: impl Into<String>,
        actions: Vec<SourceAction<T>>,
        output: SharedQueue<T>,
        settings: StageSettings,
    ) -> Self
    where
        T: Send + 'static,
    {
        let queues = vec![Arc::clone(&output).control()];
        let workers = actions
            .into_iter()
            .map(|action| {
                let output = Arc::clone(&output);
                Box::new(move |ctx: &WorkerContext| worker::source_loop(ctx, action, &*output))
                    as WorkerBody
            })
            .collect();
        Self::assemble(name.into(), StageRole::Source, workers, queues, settings)
    }

    /// Creates a transform stage reading `input` and writing `output`.
    pub fn transform<I, O>(
        name: impl Into<String>,
        actions: Vec<TransformAction<I, O>>,
        input: SharedQueue<I>,
        output: SharedQueue<O>,
        settings: StageSettings,
    ) -> Self
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let queues = vec![Arc::clone(&input).control(), Arc::clone(&output).control()];
        let workers = actions
            .into_iter()
            .map(|action| {
                let input = Arc::clone(&input);
                let output = Arc::clone(&output);
                Box::new(move |ctx: &WorkerContext| {
                    worker::transform_loop(ctx, &action, &*input, &*output)
                }) as WorkerBody
            })
            .collect();
        Self::assemble(name.into(), StageRole::Transform, workers, queues, settings)
    }

    /// Creates a sink stage consuming `input`.
    pub fn sink<I>(
        name: impl Into<String>,
        actions: Vec<SinkAction<I>>,
        input: SharedQueue<I>,
        settings: StageSettings,
    ) -> Self
    where
        I: Send + 'static,
    {
        let queues = vec![Arc::clone(&input).control()];
        let workers = actions
            .into_iter()
            .map(|action| {
                let input = Arc::clone(&input);
                Box::new(move |ctx: &WorkerContext| worker::sink_loop(ctx, &action, &*input))
                    as WorkerBody
            })
            .collect();
        Self::assemble(name.into(), StageRole::Sink, workers, queues, settings)
    }

    fn assemble(
        name: String,
        role: StageRole,
        workers: Vec<WorkerBody>,
        queues: Vec<Arc<dyn QueueControl>>,
        settings: StageSettings,
    ) -> Self {
        Self {
            name,
            role,
            workers,
            queues,
            settings,
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage role.
    #[must_use]
    pub fn role(&self) -> StageRole {
        self.role
    }

    /// Returns the number of workers the stage will run.
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Spawns one thread per worker.
    ///
    /// Worker spans are parented to the caller's current span.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Spawn`] if a thread cannot be created. Any
    /// workers already started are stopped by an immediate shutdown of the
    /// stage's queues and joined before returning.
    pub fn start(self) -> Result<RunningStage, PipelineError> {
        let num_workers = self.workers.len();
        let shared = Arc::new(StageShared::new(self.name.clone(), self.role));
        let parent = Span::current();
        let mut running = RunningStage {
            shared: Arc::clone(&shared),
            handles: Vec::with_capacity(num_workers),
            num_workers,
        };

        info!(stage = %self.name, role = %self.role, workers = num_workers, "Starting stage");

        for (index, body) in self.workers.into_iter().enumerate() {
            let ctx = WorkerContext {
                shared: Arc::clone(&shared),
                index,
                poll_timeout: self.settings.poll_timeout,
                reporter: Arc::clone(&self.settings.reporter),
                stop: self.settings.stop.clone(),
                queues: self.queues.clone(),
            };
            let span = info_span!(parent: &parent, "worker", stage = %self.name, worker = index);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}-{index}", self.settings.thread_name_prefix, self.name))
                .spawn(move || {
                    let _entered = span.enter();
                    let exit = match body(&ctx) {
                        Ok(()) => WorkerExit::Exhausted,
                        Err(exit) => exit,
                    };
                    ctx.finish(exit);
                });

            match spawned {
                Ok(handle) => running.handles.push(handle),
                Err(source) => {
                    for queue in &self.queues {
                        queue.shutdown(true);
                    }
                    drop(running);
                    return Err(PipelineError::Spawn {
                        stage: self.name,
                        source,
                    });
                }
            }
        }

        Ok(running)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("workers", &self.workers.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A started stage. Dropping it joins every worker.
#[derive(Debug)]
pub struct RunningStage {
    shared: Arc<StageShared>,
    handles: Vec<JoinHandle<()>>,
    num_workers: usize,
}

impl RunningStage {
    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the stage role.
    #[must_use]
    pub fn role(&self) -> StageRole {
        self.shared.role
    }

    /// Blocks until every worker has terminated.
    ///
    /// Does not initiate shutdown itself.
    pub fn wait_for_completion(&mut self) {
        if self.join_all() {
            let stats = self.stats();
            info!(
                stage = %stats.name,
                received = stats.received,
                emitted = stats.emitted,
                failures = stats.failures,
                interrupted = stats.interrupted,
                "Stage completed"
            );
        }
    }

    /// Returns true once every worker has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }

    /// Returns the captured failures, in worker termination order.
    #[must_use]
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.shared.failures()
    }

    /// Returns whether any worker observed the stop signal.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.shared.interrupted()
    }

    /// Returns the number of workers.
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Returns the stage counters.
    #[must_use]
    pub fn stats(&self) -> StageStats {
        self.shared.stats(self.num_workers)
    }

    /// Joins outstanding workers. Returns true if there were any.
    fn join_all(&mut self) -> bool {
        if self.handles.is_empty() {
            return false;
        }
        for (index, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() {
                self.shared.record_failure(FailureRecord::new(
                    self.shared.name.clone(),
                    index,
                    "worker thread panicked",
                ));
            }
        }
        true
    }
}

impl Drop for RunningStage {
    fn drop(&mut self) {
        self.join_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{BoundedQueue, Queue};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn quiet_settings() -> StageSettings {
        StageSettings::new(|_| {}).with_poll_timeout(Duration::from_millis(10))
    }

    #[test]
    fn test_stage_roles() {
        let q: SharedQueue<i32> = Arc::new(BoundedQueue::new(0));
        let source = Stage::source(
            "S",
            vec![SourceAction::from_values(0..1)],
            q.clone(),
            quiet_settings(),
        );
        let sink = Stage::sink(
            "K",
            SinkAction::infallible(|_: i32| {}).replicate(3),
            q,
            quiet_settings(),
        );
        assert_eq!(source.role(), StageRole::Source);
        assert_eq!(sink.role(), StageRole::Sink);
        assert_eq!(sink.num_workers(), 3);
        assert_eq!(StageRole::Transform.to_string(), "transform");
    }

    #[test]
    fn test_pipe_and_sink_fed_by_hand() {
        let input: SharedQueue<u32> = Arc::new(BoundedQueue::new(0));
        let middle: SharedQueue<u32> = Arc::new(BoundedQueue::new(5));
        let consumed = Arc::new(Mutex::new(Vec::new()));

        let pipe = Stage::transform(
            "Pipe",
            TransformAction::infallible(|x: u32| 2 * x).replicate(4),
            input.clone(),
            middle.clone(),
            quiet_settings(),
        );
        let sink = {
            let consumed = Arc::clone(&consumed);
            Stage::sink(
                "Sink",
                SinkAction::infallible(move |x: u32| consumed.lock().push(x)).replicate(2),
                middle.clone(),
                quiet_settings(),
            )
        };

        let mut pipe = pipe.start().unwrap();
        let mut sink = sink.start().unwrap();
        for i in 0..50 {
            input.put(i, Duration::from_secs(1)).unwrap();
        }
        input.shutdown(false);
        pipe.wait_for_completion();
        middle.shutdown(false);
        sink.wait_for_completion();

        let got: BTreeSet<u32> = consumed.lock().iter().copied().collect();
        let expected: BTreeSet<u32> = (0..50).map(|i| 2 * i).collect();
        assert_eq!(got, expected);
        assert_eq!(pipe.stats().received, 50);
        assert_eq!(sink.stats().emitted, 50);
        assert!(pipe.failures().is_empty());
        assert!(!sink.interrupted());
    }

    #[test]
    fn test_failing_worker_records_and_reports() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let settings = {
            let reports = Arc::clone(&reports);
            StageSettings::new(move |msg: &str| reports.lock().push(msg.to_string()))
                .with_poll_timeout(Duration::from_millis(10))
        };
        let input: SharedQueue<i32> = Arc::new(BoundedQueue::new(0));
        input.put(1, Duration::from_millis(10)).unwrap();

        let sink = Stage::sink(
            "Sink",
            vec![SinkAction::new(|x: i32| Err(anyhow::anyhow!("cannot sink {x}")))],
            input.clone(),
            settings,
        );
        let mut running = sink.start().unwrap();
        running.wait_for_completion();

        let failures = running.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error, "cannot sink 1");
        assert_eq!(reports.lock().len(), 1);
        // A failed worker does not shut down the queue by itself.
        assert!(!input.is_shutdown());
    }

    #[test]
    fn test_stop_signal_interrupts_and_shuts_queues() {
        let stop = StopSignal::new();
        let input: SharedQueue<i32> = Arc::new(BoundedQueue::new(0));
        let output: SharedQueue<i32> = Arc::new(BoundedQueue::new(0));
        let pipe = Stage::transform(
            "Pipe",
            TransformAction::infallible(|x: i32| x).replicate(2),
            input.clone(),
            output.clone(),
            quiet_settings().with_stop_signal(stop.clone()),
        );
        let mut running = pipe.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        stop.trigger("test");
        running.wait_for_completion();

        assert!(running.interrupted());
        assert!(input.is_shutdown());
        assert!(output.is_shutdown());
        assert!(running.failures().is_empty());
    }

    #[test]
    fn test_drop_joins_workers() {
        let input: SharedQueue<i32> = Arc::new(BoundedQueue::new(0));
        let processed = Arc::new(Mutex::new(0));
        {
            let processed = Arc::clone(&processed);
            let sink = Stage::sink(
                "Sink",
                vec![SinkAction::infallible(move |_: i32| {
                    std::thread::sleep(Duration::from_millis(10));
                    *processed.lock() += 1;
                })],
                input.clone(),
                quiet_settings(),
            );
            let _running = sink.start().unwrap();
            for i in 0..3 {
                input.put(i, Duration::from_millis(10)).unwrap();
            }
            input.shutdown(false);
        }
        // The guard went out of scope only after the worker drained the queue.
        assert_eq!(*processed.lock(), 3);
    }

    #[test]
    fn test_worker_threads_are_named() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let q: SharedQueue<i32> = Arc::new(BoundedQueue::new(0));
        let source = {
            let names = Arc::clone(&names);
            Stage::source(
                "Gen",
                vec![SourceAction::new(move || {
                    names
                        .lock()
                        .push(std::thread::current().name().map(str::to_string));
                    std::iter::empty()
                })],
                q,
                quiet_settings().with_thread_name_prefix("test"),
            )
        };
        source.start().unwrap().wait_for_completion();
        assert_eq!(names.lock().clone(), vec![Some("test-Gen-0".to_string())]);
    }
}
