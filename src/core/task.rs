//! Task trait and error types.
//!
//! The `Task` trait is the body of one unit of work in a graph. It receives
//! the outputs of its dependencies and returns a single output value.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use super::inputs::{InputError, TaskInputs};
use super::retry::RetryPolicy;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Task timed out.
    #[error("task timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// External command failed with exit code.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// Error reading dependency outputs.
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// A transient error that may succeed on retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// The task body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Check if this error is considered transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Transient(_) | TaskError::Timeout(_))
    }
}

/// The core trait for defining executable tasks.
///
/// # Example
///
/// ```
/// use tessera::{Task, TaskError, TaskInputs};
/// use async_trait::async_trait;
/// use serde_json::{Value, json};
///
/// struct CountScenes;
///
/// #[async_trait]
/// impl Task for CountScenes {
///     async fn run(&self, inputs: TaskInputs) -> Result<Value, TaskError> {
///         let scenes: Vec<String> = inputs.get("breakdown")?;
///         Ok(json!(scenes.len()))
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Execute the task with the outputs of its dependencies.
    ///
    /// # Returns
    /// * `Ok(value)` - Task completed; `value` is stored as its result
    /// * `Err(TaskError)` - Task failed; nothing is stored
    async fn run(&self, inputs: TaskInputs) -> Result<Value, TaskError>;

    /// Retry policy overriding the graph default for this task.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}

/// A task built from an async closure.
pub struct FnTask<F> {
    f: F,
}

impl<F> FnTask<F> {
    /// Wrap a closure as a task.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn(TaskInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    async fn run(&self, inputs: TaskInputs) -> Result<Value, TaskError> {
        (self.f)(inputs).await
    }
}

/// Build a shareable task from an async closure.
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn Task>
where
    F: Fn(TaskInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Arc::new(FnTask::new(f))
}
