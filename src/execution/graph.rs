//! Dependency-graph execution engine.
//!
//! A [`TaskGraph`] owns the task registry, the result store and the set of
//! in-flight tasks for exactly one run. `execute_all` repeatedly computes the
//! ready tasks, launches them as one batch under a [`ConcurrencyLimiter`],
//! waits for the whole batch to settle and scans again, until every task has
//! a result or no further progress is possible.
//!
//! Cycles and missing registrations are not validated up front. They are
//! detected by exhaustion: when nothing is ready and nothing is running while
//! tasks remain unresolved, the run fails with [`GraphError::Deadlock`].

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::inputs::TaskInputs;
use crate::core::registry::TaskRegistry;
use crate::core::results::ResultStore;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Task, TaskError, task_fn};
use crate::core::types::{RunId, TaskId};
use crate::events::{Event, EventBus};

use super::limiter::ConcurrencyLimiter;
use super::progress::{Progress, ProgressReporter};

/// Errors surfaced by graph execution.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Execution was requested for a task that was never registered.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The task is already being executed.
    #[error("task already running: {0}")]
    AlreadyRunning(TaskId),

    /// Some dependencies of the task have no result yet.
    #[error("task '{task}' has unresolved dependencies: {}", join_ids(.missing))]
    UnresolvedDependencies { task: TaskId, missing: Vec<TaskId> },

    /// The task body returned an error or panicked.
    #[error("task '{task}' failed: {source}")]
    TaskFailed {
        task: TaskId,
        #[source]
        source: TaskError,
    },

    /// No task is ready and none is running, yet some remain unresolved.
    /// Caused by a dependency cycle or a dependency that was never registered.
    #[error("deadlock: no task can start, unresolved tasks: {}", join_ids(.unresolved))]
    Deadlock { unresolved: BTreeSet<TaskId> },

    /// Tasks exhausted their retry policy and the rest of the graph could not
    /// progress without them.
    #[error(
        "{} task(s) failed permanently ({}), unresolved tasks: {}",
        .failures.len(),
        join_failures(.failures),
        join_ids(.unresolved)
    )]
    TasksFailed {
        failures: Vec<TaskFailure>,
        unresolved: BTreeSet<TaskId>,
    },
}

impl GraphError {
    /// The task this error is about, for single-task errors.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            GraphError::NotFound(task) | GraphError::AlreadyRunning(task) => Some(task),
            GraphError::UnresolvedDependencies { task, .. } | GraphError::TaskFailed { task, .. } => {
                Some(task)
            }
            GraphError::Deadlock { .. } | GraphError::TasksFailed { .. } => None,
        }
    }

    /// Tasks left without a result when a run aborted.
    pub fn unresolved(&self) -> Option<&BTreeSet<TaskId>> {
        match self {
            GraphError::Deadlock { unresolved } | GraphError::TasksFailed { unresolved, .. } => {
                Some(unresolved)
            }
            _ => None,
        }
    }
}

/// A task that was given up on after exhausting its retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// The failed task.
    pub task: TaskId,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Error of the last attempt.
    pub error: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.task, self.attempts, self.error
        )
    }
}

fn join_ids<'a>(ids: impl IntoIterator<Item = &'a TaskId>) -> String {
    ids.into_iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Mutable state of one graph instance.
#[derive(Debug, Default)]
struct GraphState {
    registry: TaskRegistry,
    results: ResultStore,
    in_progress: HashSet<TaskId>,
    /// Body invocations per task.
    attempts: HashMap<TaskId, u32>,
    /// Tasks given up on by a bounded retry policy.
    failed: BTreeMap<TaskId, TaskFailure>,
}

impl GraphState {
    /// Registered tasks that have no result, are not running, were not given
    /// up on, and whose dependencies all have results. Registration order.
    fn ready_tasks(&self) -> Vec<TaskId> {
        self.registry
            .iter()
            .filter(|def| {
                !self.results.contains(&def.id)
                    && !self.in_progress.contains(&def.id)
                    && !self.failed.contains_key(&def.id)
                    && def
                        .dependencies
                        .iter()
                        .all(|dep| self.results.contains(dep))
            })
            .map(|def| def.id.clone())
            .collect()
    }

    fn completed(&self) -> usize {
        self.registry
            .iter()
            .filter(|def| self.results.contains(&def.id))
            .count()
    }

    fn is_fully_resolved(&self) -> bool {
        self.completed() == self.registry.len()
    }

    fn unresolved(&self) -> BTreeSet<TaskId> {
        self.registry
            .iter()
            .filter(|def| !self.results.contains(&def.id))
            .map(|def| def.id.clone())
            .collect()
    }
}

struct GraphInner {
    run_id: RunId,
    state: Mutex<GraphState>,
    /// Signalled whenever a task leaves the in-progress set.
    settled: Notify,
}

impl GraphInner {
    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a task from the in-progress set when dropped, including when the
/// body panics or the future is cancelled.
struct InFlight<'a> {
    inner: &'a GraphInner,
    id: TaskId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.lock().in_progress.remove(&self.id);
        self.inner.settled.notify_waiters();
    }
}

/// Tasks launched together in one scan. Unfinished tasks are aborted if the
/// batch is dropped before it settles.
#[derive(Default)]
struct Batch {
    handles: VecDeque<(TaskId, JoinHandle<Result<Value, GraphError>>)>,
}

impl Batch {
    fn push(&mut self, id: TaskId, handle: JoinHandle<Result<Value, GraphError>>) {
        self.handles.push_back((id, handle));
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every task in the batch. One task failing or panicking does
    /// not affect its siblings.
    async fn settle(&mut self) -> Vec<(TaskId, Result<Value, GraphError>)> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        while let Some((id, handle)) = self.handles.front_mut() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(GraphError::TaskFailed {
                    task: id.clone(),
                    source: TaskError::Panicked(join_error.to_string()),
                }),
            };
            let id = id.clone();
            self.handles.pop_front();
            outcomes.push((id, outcome));
        }
        outcomes
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
    }
}

/// A graph of named async tasks with declared dependencies.
///
/// Create one graph per run. Clones share the same state, which lets batch
/// members run on the tokio runtime while the coordinator keeps scanning.
///
/// # Example
///
/// ```
/// use tessera::{TaskGraph, TaskInputs, TaskId};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), tessera::GraphError> {
/// let graph = TaskGraph::new();
/// graph.register_fn("breakdown", Vec::<TaskId>::new(), |_| async { Ok(json!(["intro", "outro"])) });
/// graph.register_fn("count", ["breakdown"], |inputs: TaskInputs| async move {
///     let scenes: Vec<String> = inputs.get("breakdown")?;
///     Ok(json!(scenes.len()))
/// });
///
/// let results = graph.execute_all(2, None).await?;
/// assert_eq!(results[&TaskId::new("count")], json!(2));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TaskGraph {
    inner: Arc<GraphInner>,
    retry_policy: RetryPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl TaskGraph {
    /// Create an empty graph with the default (unbounded) retry policy.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GraphInner {
                run_id: RunId::new(),
                state: Mutex::new(GraphState::default()),
                settled: Notify::new(),
            }),
            retry_policy: RetryPolicy::default(),
            event_bus: None,
        }
    }

    /// Builder: set the retry policy applied to tasks that do not override it.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Builder: emit lifecycle events to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Identifier of this graph instance, attached to logs and events.
    pub fn run_id(&self) -> &RunId {
        &self.inner.run_id
    }

    /// The graph-wide retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Register a task with its dependencies.
    ///
    /// Registering an existing ID replaces its body and dependencies. Tasks
    /// must not be registered once `execute_all` has started.
    pub fn register<I, D>(&self, id: impl Into<TaskId>, task: Arc<dyn Task>, dependencies: I)
    where
        I: IntoIterator<Item = D>,
        D: Into<TaskId>,
    {
        self.inner.lock().registry.register(id, task, dependencies);
    }

    /// Register an async closure as a task.
    pub fn register_fn<I, D, F, Fut>(&self, id: impl Into<TaskId>, dependencies: I, f: F)
    where
        I: IntoIterator<Item = D>,
        D: Into<TaskId>,
        F: Fn(TaskInputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.register(id, task_fn(f), dependencies);
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Check if no task is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().registry.is_empty()
    }

    /// All task IDs in registration order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.inner.lock().registry.task_ids()
    }

    /// Declared dependencies of a task.
    pub fn dependencies(&self, id: &TaskId) -> Option<Vec<TaskId>> {
        self.inner
            .lock()
            .registry
            .dependencies(id)
            .map(<[TaskId]>::to_vec)
    }

    /// Registered tasks that declare `id` as a dependency.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.inner.lock().registry.dependents(id)
    }

    /// Human-readable description of a task, if it provides one.
    pub fn description(&self, id: &TaskId) -> Option<String> {
        self.inner
            .lock()
            .registry
            .get(id)
            .and_then(|def| def.task.description().map(str::to_string))
    }

    /// Tasks that may start now, in registration order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.inner.lock().ready_tasks()
    }

    /// True when every registered task has a result.
    pub fn is_fully_resolved(&self) -> bool {
        self.inner.lock().is_fully_resolved()
    }

    /// The stored result of a task.
    pub fn result(&self, id: &TaskId) -> Option<Value> {
        self.inner.lock().results.get(id).cloned()
    }

    /// Snapshot of all stored results.
    pub fn results(&self) -> HashMap<TaskId, Value> {
        self.inner.lock().results.to_map()
    }

    /// Tasks currently executing, sorted.
    pub fn in_progress(&self) -> Vec<TaskId> {
        let mut running: Vec<TaskId> = self.inner.lock().in_progress.iter().cloned().collect();
        running.sort();
        running
    }

    /// Number of times a task body has been invoked.
    pub fn attempts(&self, id: &TaskId) -> u32 {
        self.inner.lock().attempts.get(id).copied().unwrap_or(0)
    }

    /// Tasks given up on by a bounded retry policy, sorted by ID.
    pub fn failed_tasks(&self) -> Vec<TaskFailure> {
        self.inner.lock().failed.values().cloned().collect()
    }

    /// Execute a single task.
    ///
    /// Returns the cached output if the task already completed, without
    /// invoking its body again. Otherwise the task joins the in-progress set,
    /// receives its dependencies' outputs, and its output is stored on success.
    /// Failures are returned to the caller as [`GraphError::TaskFailed`].
    pub async fn execute_task(&self, id: &TaskId) -> Result<Value, GraphError> {
        let (task, inputs) = {
            let mut state = self.inner.lock();
            if let Some(value) = state.results.get(id) {
                debug!(task = %id, "returning cached result");
                return Ok(value.clone());
            }

            let (task, dependencies) = {
                let definition = state
                    .registry
                    .get(id)
                    .ok_or_else(|| GraphError::NotFound(id.clone()))?;
                (Arc::clone(&definition.task), definition.dependencies.clone())
            };

            if state.in_progress.contains(id) {
                return Err(GraphError::AlreadyRunning(id.clone()));
            }

            let inputs = state.results.gather(&dependencies).map_err(|missing| {
                GraphError::UnresolvedDependencies {
                    task: id.clone(),
                    missing,
                }
            })?;

            state.in_progress.insert(id.clone());
            *state.attempts.entry(id.clone()).or_insert(0) += 1;
            (task, inputs)
        };
        let in_flight = InFlight {
            inner: &self.inner,
            id: id.clone(),
        };

        self.emit(Event::task_started(id.clone(), self.run_id().clone()))
            .await;
        debug!(task = %id, inputs = inputs.len(), "running task");

        let start = Instant::now();
        match task.run(inputs).await {
            Ok(value) => {
                {
                    let mut state = self.inner.lock();
                    state.results.insert(id.clone(), value.clone());
                    state.failed.remove(id);
                }
                drop(in_flight);

                let duration = start.elapsed();
                debug!(task = %id, duration_ms = %duration.as_millis(), "task completed");
                self.emit(Event::task_completed(
                    id.clone(),
                    self.run_id().clone(),
                    duration,
                ))
                .await;
                Ok(value)
            }
            Err(source) => {
                drop(in_flight);

                warn!(task = %id, error = %source, "task failed");
                self.emit(Event::task_failed(
                    id.clone(),
                    self.run_id().clone(),
                    source.to_string(),
                ))
                .await;
                Err(GraphError::TaskFailed {
                    task: id.clone(),
                    source,
                })
            }
        }
    }

    /// Execute every registered task, respecting dependencies.
    ///
    /// At most `max_concurrency` task bodies run at once. Progress is reported
    /// with 0% at start, after each successful task, and with 100% when the
    /// run ends. If the run halts, the final update has `halted` set.
    ///
    /// Failed tasks are handed to the retry policy. With the default
    /// [`RetryPolicy::Unbounded`], a task that never succeeds is relaunched
    /// forever and this future only ends if the caller cancels it.
    pub async fn execute_all(
        &self,
        max_concurrency: usize,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<HashMap<TaskId, Value>, GraphError> {
        let limiter = ConcurrencyLimiter::new(max_concurrency);
        let span = info_span!(
            "graph_run",
            run = %self.run_id(),
            task_count = self.len(),
            max_concurrency = limiter.max_concurrency(),
        );
        self.coordinate(limiter, progress).instrument(span).await
    }

    async fn coordinate(
        &self,
        limiter: ConcurrencyLimiter,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<HashMap<TaskId, Value>, GraphError> {
        let report = |update: Progress| {
            debug!(percent = update.percent, message = %update.message, "progress");
            if let Some(reporter) = progress {
                reporter.report(&update);
            }
        };

        let start = Instant::now();
        let total = self.len();
        let mut completed = 0usize;
        let mut failed_attempts = 0usize;

        info!("starting graph run");
        report(Progress::started(total));
        self.emit(Event::run_started(self.run_id().clone(), total))
            .await;

        loop {
            let (ready, running, resolved) = {
                let state = self.inner.lock();
                (
                    state.ready_tasks(),
                    state.in_progress.len(),
                    state.is_fully_resolved(),
                )
            };

            if resolved {
                break;
            }

            if ready.is_empty() {
                if running > 0 {
                    debug!(running, "no ready tasks, waiting for in-flight tasks");
                    self.wait_for_settle().await;
                    continue;
                }

                let err = self.halt_error();
                error!(error = %err, "graph run cannot make progress");
                report(Progress::halted(completed, total, failed_attempts, &err));
                self.emit(Event::run_completed(
                    self.run_id().clone(),
                    false,
                    start.elapsed(),
                ))
                .await;
                return Err(err);
            }

            let mut batch = Batch::default();
            for id in ready {
                let graph = self.clone();
                let limiter = limiter.clone();
                let task_id = id.clone();
                let description = self.description(&id);
                let span = info_span!("task", task = %id, description = description.as_deref());
                let handle = tokio::spawn(
                    async move {
                        let _admission = limiter.acquire().await;
                        graph.execute_task(&task_id).await
                    }
                    .instrument(span),
                );
                batch.push(id, handle);
            }
            debug!(batch_size = batch.len(), "dispatched batch");

            for (id, outcome) in batch.settle().await {
                match outcome {
                    Ok(_) => {
                        completed += 1;
                        report(Progress::new(
                            completed,
                            total,
                            failed_attempts,
                            format!("completed '{}' ({}/{})", id, completed, total),
                        ));
                    }
                    Err(GraphError::TaskFailed { source, .. }) => {
                        failed_attempts += 1;
                        self.handle_failure(&id, &source).await;
                    }
                    Err(err) => {
                        debug!(task = %id, error = %err, "task was not run in this batch");
                    }
                }
            }
        }

        let duration = start.elapsed();
        info!(
            duration_ms = %duration.as_millis(),
            failed_attempts,
            "graph run completed"
        );
        report(Progress::finished(completed, total, failed_attempts));
        self.emit(Event::run_completed(self.run_id().clone(), true, duration))
            .await;

        Ok(self.results())
    }

    /// Apply the retry policy to a task whose latest attempt failed.
    async fn handle_failure(&self, id: &TaskId, source: &TaskError) {
        let (attempt, policy, abandoned, blocked) = {
            let mut state = self.inner.lock();
            let policy = state
                .registry
                .get(id)
                .and_then(|def| def.task.retry_policy())
                .unwrap_or(self.retry_policy);
            let attempt = state.attempts.get(id).copied().unwrap_or(1);
            let abandoned = !policy.should_retry(attempt);
            let mut blocked = Vec::new();
            if abandoned {
                blocked = state.registry.dependents(id);
                state.failed.insert(
                    id.clone(),
                    TaskFailure {
                        task: id.clone(),
                        attempts: attempt,
                        error: source.to_string(),
                    },
                );
            }
            (attempt, policy, abandoned, blocked)
        };

        if abandoned {
            error!(
                task = %id,
                attempts = attempt,
                error = %source,
                blocked = ?blocked,
                "giving up on task"
            );
            self.emit(Event::task_abandoned(
                id.clone(),
                self.run_id().clone(),
                attempt,
            ))
            .await;
        } else {
            warn!(
                task = %id,
                attempt,
                max_attempts = ?policy.limit(),
                transient = source.is_transient(),
                "task will be relaunched on the next scan"
            );
            self.emit(Event::task_retrying(
                id.clone(),
                self.run_id().clone(),
                attempt,
                policy.limit(),
            ))
            .await;
        }
    }

    /// Error describing why the run cannot progress.
    fn halt_error(&self) -> GraphError {
        let state = self.inner.lock();
        let unresolved = state.unresolved();
        if state.failed.is_empty() {
            GraphError::Deadlock { unresolved }
        } else {
            GraphError::TasksFailed {
                failures: state.failed.values().cloned().collect(),
                unresolved,
            }
        }
    }

    /// Wait until some in-flight task leaves the in-progress set.
    async fn wait_for_settle(&self) {
        let mut notified = pin!(self.inner.settled.notified());
        notified.as_mut().enable();
        let idle = self.inner.lock().in_progress.is_empty();
        if idle {
            return;
        }
        notified.await;
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TaskGraph")
            .field("run_id", &self.inner.run_id)
            .field("tasks", &state.registry.len())
            .field("completed", &state.results.len())
            .field("in_progress", &state.in_progress.len())
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}
