//! Task execution engine.
//!
//! This module provides the graph coordinator, the concurrency limiter that
//! bounds how many task bodies run at once, progress reporting, and external
//! command tasks.

mod command;
mod graph;
mod limiter;
mod progress;

pub use command::{
    CommandTask, CommandTaskBuilder, INPUT_VAR_PREFIX, INPUTS_VAR, input_var_name, parse_output,
};
pub use graph::{GraphError, TaskFailure, TaskGraph};
pub use limiter::{Admission, ConcurrencyLimiter};
pub use progress::{Progress, ProgressReporter, percent};
