//! Observability utilities.

mod logging;

pub use logging::{init_logging, logging_reporter};
