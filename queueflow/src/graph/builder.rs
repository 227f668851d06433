//! Typed builder for linear execution graphs.

use super::abort::AbortSwitch;
use super::ExecutionGraph;
use crate::cancellation::StopSignal;
use crate::config::PipelineConfig;
use crate::queue::{BoundedQueue, QueueControl, SharedQueue};
use crate::stage::{
    ErrorReporter, SinkAction, SourceAction, Stage, StageSettings, TransformAction,
};
use std::sync::Arc;

/// Builder for a source → transforms → sink pipeline.
///
/// The item type flows through the chain: [`PipelineBuilder::source`] yields a
/// [`StageChain<T>`], each transform changes `T`, and [`StageChain::sink`]
/// closes the chain into an [`ExecutionGraph`]. Queues between stages default
/// to a [`BoundedQueue`] sized by `default_queue_capacity`; the `*_into`
/// variants accept any pre-built queue instead.
///
/// ```no_run
/// use queueflow::prelude::*;
///
/// let summary = PipelineBuilder::new(PipelineConfig::default(), |msg| eprintln!("{msg}"))
///     .source("numbers", vec![SourceAction::from_values(0..10_u32)])
///     .transform("double", TransformAction::infallible(|x: u32| x * 2).replicate(2))
///     .sink("print", vec![SinkAction::infallible(|x: u32| println!("{x}"))])
///     .run();
/// ```
pub struct PipelineBuilder {
    config: PipelineConfig,
    reporter: ErrorReporter,
    stop: StopSignal,
}

impl PipelineBuilder {
    /// Creates a builder reporting worker failures to `reporter`.
    pub fn new<F>(config: PipelineConfig, reporter: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self::from_reporter(config, Arc::new(reporter))
    }

    /// Creates a builder from a shared reporter.
    #[must_use]
    pub fn from_reporter(config: PipelineConfig, reporter: ErrorReporter) -> Self {
        Self {
            config,
            reporter,
            stop: StopSignal::new(),
        }
    }

    /// Uses an externally owned stop signal.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Adds the source stage, writing into a default queue.
    #[must_use]
    pub fn source<T>(self, name: impl Into<String>, actions: Vec<SourceAction<T>>) -> StageChain<T>
    where
        T: Send + 'static,
    {
        let output = default_queue(&self.config);
        self.source_into(name, actions, output)
    }

    /// Adds the source stage, writing into `output`.
    #[must_use]
    pub fn source_into<T>(
        self,
        name: impl Into<String>,
        actions: Vec<SourceAction<T>>,
        output: SharedQueue<T>,
    ) -> StageChain<T>
    where
        T: Send + 'static,
    {
        let mut wiring = Wiring {
            abort: AbortSwitch::new(self.reporter),
            config: self.config,
            stop: self.stop,
            stages: Vec::new(),
            queues: Vec::new(),
            problems: Vec::new(),
        };
        let name = name.into();
        wiring.check_workers(&name, actions.len());
        wiring.add_queue(&output);
        let settings = wiring.settings();
        wiring
            .stages
            .push(Stage::source(name, actions, Arc::clone(&output), settings));
        StageChain {
            wiring,
            tail: output,
        }
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

/// A partially built pipeline whose last stage emits `T`.
pub struct StageChain<T> {
    wiring: Wiring,
    tail: SharedQueue<T>,
}

impl<T: Send + 'static> StageChain<T> {
    /// Adds a transform stage, writing into a default queue.
    #[must_use]
    pub fn transform<O>(
        self,
        name: impl Into<String>,
        actions: Vec<TransformAction<T, O>>,
    ) -> StageChain<O>
    where
        O: Send + 'static,
    {
        let output = default_queue(&self.wiring.config);
        self.transform_into(name, actions, output)
    }

    /// Adds a transform stage, writing into `output`.
    #[must_use]
    pub fn transform_into<O>(
        mut self,
        name: impl Into<String>,
        actions: Vec<TransformAction<T, O>>,
        output: SharedQueue<O>,
    ) -> StageChain<O>
    where
        O: Send + 'static,
    {
        let name = name.into();
        self.wiring.check_workers(&name, actions.len());
        self.wiring.add_queue(&output);
        let settings = self.wiring.settings();
        self.wiring.stages.push(Stage::transform(
            name,
            actions,
            self.tail,
            Arc::clone(&output),
            settings,
        ));
        StageChain {
            wiring: self.wiring,
            tail: output,
        }
    }

    /// Adds the sink stage and closes the chain.
    #[must_use]
    pub fn sink(mut self, name: impl Into<String>, actions: Vec<SinkAction<T>>) -> ExecutionGraph {
        let name = name.into();
        self.wiring.check_workers(&name, actions.len());
        let settings = self.wiring.settings();
        self.wiring
            .stages
            .push(Stage::sink(name, actions, self.tail, settings));
        ExecutionGraph::from_wiring(self.wiring)
    }
}

impl<T> std::fmt::Debug for StageChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageChain")
            .field("stages", &self.wiring.stages.len())
            .finish_non_exhaustive()
    }
}

/// Stages and queues collected so far.
pub(super) struct Wiring {
    pub(super) config: PipelineConfig,
    pub(super) stop: StopSignal,
    pub(super) abort: Arc<AbortSwitch>,
    pub(super) stages: Vec<Stage>,
    /// Queue *i* sits between stage *i* and stage *i + 1*.
    pub(super) queues: Vec<Arc<dyn QueueControl>>,
    /// Problems found while building, reported when the graph runs.
    pub(super) problems: Vec<String>,
}

impl Wiring {
    fn settings(&self) -> StageSettings {
        StageSettings::with_reporter(self.abort.reporter())
            .with_poll_timeout(self.config.poll_timeout())
            .with_stop_signal(self.stop.clone())
            .with_thread_name_prefix(self.config.thread_name_prefix.clone())
    }

    fn check_workers(&mut self, name: &str, workers: usize) {
        if workers == 0 {
            self.problems
                .push(format!("stage '{name}' needs at least one action"));
        }
        if name.trim().is_empty() {
            self.problems.push("stage name cannot be empty".to_string());
        }
    }

    fn add_queue<T: Send + 'static>(&mut self, queue: &SharedQueue<T>) {
        let control = Arc::clone(queue).control();
        self.abort.register_queue(Arc::clone(&control));
        self.queues.push(control);
    }
}

fn default_queue<T: Send + 'static>(config: &PipelineConfig) -> SharedQueue<T> {
    Arc::new(BoundedQueue::new(config.default_queue_capacity))
}
