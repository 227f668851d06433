//! External interruption of running pipelines.

mod stop;

pub use stop::{watch_ctrl_c, StopSignal};
