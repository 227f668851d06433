//! Testing utilities for queueflow pipelines.
//!
//! This module provides:
//! - Recording sources and sinks with optional processing delays
//! - Actions that always fail, for abort scenarios

mod recording;

pub use recording::{CountingSource, ProcessingDelay, RecordingSink};

use crate::stage::TransformAction;

/// A transform that fails on every item with `message`.
#[must_use]
pub fn failing_transform<I: 'static, O: 'static>(
    message: impl Into<String>,
) -> TransformAction<I, O> {
    let message = message.into();
    TransformAction::new(move |_: I| Err(anyhow::anyhow!("{message}")))
}
