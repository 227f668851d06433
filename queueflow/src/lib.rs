//! # Queueflow
//!
//! Thread-based pipelines of worker-pool stages connected by queues.
//!
//! Queueflow provides:
//!
//! - **Queues**: a FIFO [`BoundedQueue`](queue::BoundedQueue) and a
//!   [`PartitionedQueue`](queue::PartitionedQueue) that conflates pending
//!   values sharing a key
//! - **Stages**: named pools of worker threads running source, transform or
//!   sink actions, with failures captured per worker
//! - **Execution graphs**: a linear source → transforms → sink chain that
//!   aborts on the first failure and reports every captured error at once
//! - **Cancellation**: a cooperative [`StopSignal`](cancellation::StopSignal),
//!   optionally wired to Ctrl-C
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use queueflow::prelude::*;
//!
//! let config = PipelineConfig::new().with_name("squares");
//! let summary = PipelineBuilder::from_reporter(config, logging_reporter())
//!     .source("numbers", vec![SourceAction::from_values(0..100_u64)])
//!     .transform("square", TransformAction::infallible(|x: u64| x * x).replicate(4))
//!     .sink("print", vec![SinkAction::infallible(|x: u64| println!("{x}"))])
//!     .run()?;
//! println!("consumed {} items", summary.items_consumed());
//! # Ok::<(), queueflow::errors::PipelineError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod errors;
pub mod graph;
pub mod observability;
pub mod queue;
pub mod stage;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{watch_ctrl_c, StopSignal};
    pub use crate::config::{LoggingConfig, PipelineConfig};
    pub use crate::errors::{FailureRecord, PipelineError, PutError, QueueError};
    pub use crate::graph::{ExecutionGraph, PipelineBuilder, RunSummary, StageChain};
    pub use crate::observability::{init_logging, logging_reporter};
    pub use crate::queue::{BoundedQueue, PartitionedQueue, Queue, QueueControl, SharedQueue};
    pub use crate::stage::{
        ErrorReporter, RunningStage, SinkAction, SourceAction, Stage, StageRole, StageSettings,
        StageStats, TransformAction,
    };
}
