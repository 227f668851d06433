//! Worker loops for the source, transform and sink roles.

use super::action::{SinkAction, SourceAction, TransformAction};
use super::state::StageShared;
use super::ErrorReporter;
use crate::cancellation::StopSignal;
use crate::errors::{FailureRecord, QueueError};
use crate::queue::{Queue, QueueControl};
use anyhow::anyhow;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Pause after an immediate `Full`/`Empty` so idle workers do not spin.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Why a worker loop ended.
#[derive(Debug)]
pub(crate) enum WorkerExit {
    /// The source sequence was exhausted.
    Exhausted,
    /// A queue reported shutdown.
    ShutDown,
    /// The stop signal was observed.
    Interrupted,
    /// The action failed or panicked.
    Failed(anyhow::Error),
}

/// A worker loop bound to its action and queues.
pub(crate) type WorkerBody = Box<dyn FnOnce(&WorkerContext) -> Result<(), WorkerExit> + Send>;

/// Everything a worker needs besides its action and queues.
pub(crate) struct WorkerContext {
    pub(crate) shared: Arc<StageShared>,
    pub(crate) index: usize,
    pub(crate) poll_timeout: Duration,
    pub(crate) reporter: ErrorReporter,
    pub(crate) stop: StopSignal,
    /// Every queue the stage references, shut down on interruption.
    pub(crate) queues: Vec<Arc<dyn QueueControl>>,
}

impl WorkerContext {
    /// Records how the worker ended.
    pub(crate) fn finish(&self, exit: WorkerExit) {
        let stage = &self.shared.name;
        match exit {
            WorkerExit::Exhausted => debug!(stage = %stage, worker = self.index, "Source exhausted"),
            WorkerExit::ShutDown => debug!(stage = %stage, worker = self.index, "Queue shut down"),
            WorkerExit::Interrupted => {
                warn!(stage = %stage, worker = self.index, "Worker interrupted");
                self.shared.mark_interrupted();
                for queue in &self.queues {
                    queue.shutdown(true);
                }
            }
            WorkerExit::Failed(err) => {
                let record = FailureRecord::new(stage.clone(), self.index, format!("{err:#}"));
                error!(stage = %stage, worker = self.index, error = %record.error, "Worker failed");
                let message = record.to_string();
                self.shared.record_failure(record);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (self.reporter)(&message))) {
                    warn!(
                        stage = %stage,
                        panic = %panic_message(payload.as_ref()),
                        "Error reporter panicked"
                    );
                }
            }
        }
    }

    fn check_stop(&self) -> Result<(), WorkerExit> {
        if self.stop.is_triggered() {
            Err(WorkerExit::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Takes the next item, retrying until a value arrives or the queue shuts down.
    fn pull<T>(&self, input: &dyn Queue<T>) -> Result<T, WorkerExit> {
        loop {
            self.check_stop()?;
            match guarded_queue(|| input.get(self.poll_timeout))? {
                Ok(item) => {
                    self.shared.record_received();
                    return Ok(item);
                }
                Err(QueueError::ShutDown) => return Err(WorkerExit::ShutDown),
                Err(QueueError::Empty) => self.idle(),
                Err(QueueError::Timeout | QueueError::Full) => {}
            }
        }
    }

    /// Puts an item, retrying until it is accepted or the queue shuts down.
    fn push<T>(&self, output: &dyn Queue<T>, mut item: T) -> Result<(), WorkerExit> {
        loop {
            self.check_stop()?;
            match guarded_queue(|| output.put(item, self.poll_timeout))? {
                Ok(()) => {
                    self.shared.record_emitted();
                    return Ok(());
                }
                Err(rejected) if rejected.error == QueueError::ShutDown => {
                    return Err(WorkerExit::ShutDown);
                }
                Err(rejected) => {
                    if rejected.error == QueueError::Full {
                        self.idle();
                    }
                    item = rejected.into_inner();
                }
            }
        }
    }

    fn idle(&self) {
        std::thread::sleep(IDLE_BACKOFF.min(self.poll_timeout));
    }
}

/// Runs a fallible closure, turning a panic into an error.
fn guarded<R>(f: impl FnOnce() -> anyhow::Result<R>) -> anyhow::Result<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("action panicked: {}", panic_message(payload.as_ref()))),
    }
}

/// Runs a queue operation, turning a panic in a partitioner or conflater
/// into a worker failure.
fn guarded_queue<R>(f: impl FnOnce() -> R) -> Result<R, WorkerExit> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        WorkerExit::Failed(anyhow!(
            "queue operation panicked: {}",
            panic_message(payload.as_ref())
        ))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) fn source_loop<T>(
    ctx: &WorkerContext,
    action: SourceAction<T>,
    output: &dyn Queue<T>,
) -> Result<(), WorkerExit>
where
    T: 'static,
{
    let mut items = guarded(|| Ok(action.start())).map_err(WorkerExit::Failed)?;
    loop {
        ctx.check_stop()?;
        let next = guarded(|| items.next().transpose()).map_err(WorkerExit::Failed)?;
        let Some(item) = next else {
            return Ok(());
        };
        ctx.push(output, item)?;
    }
}

pub(crate) fn transform_loop<I, O>(
    ctx: &WorkerContext,
    action: &TransformAction<I, O>,
    input: &dyn Queue<I>,
    output: &dyn Queue<O>,
) -> Result<(), WorkerExit> {
    loop {
        let item = ctx.pull(input)?;
        let result = guarded(|| action.call(item)).map_err(WorkerExit::Failed)?;
        ctx.push(output, result)?;
    }
}

pub(crate) fn sink_loop<I>(
    ctx: &WorkerContext,
    action: &SinkAction<I>,
    input: &dyn Queue<I>,
) -> Result<(), WorkerExit> {
    loop {
        let item = ctx.pull(input)?;
        guarded(|| action.call(item)).map_err(WorkerExit::Failed)?;
        ctx.shared.record_emitted();
    }
}
