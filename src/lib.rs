//! tessera - run a graph of dependent async tasks with bounded concurrency.
//!
//! Tasks are registered under a [`TaskId`] with the IDs of the tasks they
//! depend on. [`TaskGraph::execute_all`] runs everything in dependency order,
//! at most `max_concurrency` bodies at a time, passing each task the outputs
//! of its dependencies as [`TaskInputs`]. Cycles and missing dependencies are
//! reported as [`GraphError::Deadlock`] once no further progress is possible.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod testing;

pub use config::{ConfigError, GraphConfig, PipelineConfig, load_pipeline};
pub use crate::core::environment::Environment;
pub use crate::core::inputs::{InputError, TaskInputs};
pub use crate::core::registry::{TaskDefinition, TaskRegistry};
pub use crate::core::results::ResultStore;
pub use crate::core::retry::RetryPolicy;
pub use crate::core::task::{FnTask, Task, TaskError, task_fn};
pub use crate::core::types::{RunId, TaskId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    CommandTask, CommandTaskBuilder, ConcurrencyLimiter, GraphError, Progress, ProgressReporter,
    TaskFailure, TaskGraph,
};
