//! Testing utilities for users of the tessera library.
//!
//! This module provides task doubles and helpers for testing graphs:
//!
//! - [`RecordingTask`]: records when it ran into a shared [`ExecutionLog`]
//! - [`FlakyTask`]: fails N times then succeeds
//! - [`CountingTask`]: counts body invocations
//! - [`ProgressRecorder`]: collects progress updates
//! - [`TestHarness`]: runs a graph and captures the outcome and progress

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::core::inputs::TaskInputs;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Task, TaskError};
use crate::core::types::TaskId;
use crate::execution::{GraphError, Progress, ProgressReporter, TaskGraph};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded body execution.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub task: TaskId,
    /// Global start order, starting at 0.
    pub order: usize,
    pub started: Instant,
    pub finished: Instant,
    /// Dependencies the body received, sorted.
    pub inputs: Vec<TaskId>,
}

/// Shared log of body executions across many [`RecordingTask`]s.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    records: Mutex<Vec<ExecutionRecord>>,
    next_order: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ExecutionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All completed executions in completion order.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        lock(&self.records).clone()
    }

    /// The record of `task`'s latest execution.
    pub fn record(&self, task: &str) -> Option<ExecutionRecord> {
        lock(&self.records)
            .iter()
            .rev()
            .find(|record| record.task.as_str() == task)
            .cloned()
    }

    /// Global start order of `task`.
    pub fn order_of(&self, task: &str) -> Option<usize> {
        self.record(task).map(|record| record.order)
    }

    /// True if `first` finished before `second` started.
    pub fn finished_before_started(&self, first: &str, second: &str) -> bool {
        match (self.record(first), self.record(second)) {
            (Some(a), Some(b)) => a.finished <= b.started,
            _ => false,
        }
    }

    /// Largest number of bodies observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of completed executions.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A task that logs its execution interval and returns a fixed output.
///
/// # Example
///
/// ```
/// use tessera::TaskGraph;
/// use tessera::testing::{ExecutionLog, RecordingTask};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let log = ExecutionLog::new();
/// let graph = TaskGraph::new();
/// graph.register("a", Arc::new(RecordingTask::new("a", &log)), Vec::<&str>::new());
/// graph.register("b", Arc::new(RecordingTask::new("b", &log)), ["a"]);
///
/// graph.execute_all(2, None).await.unwrap();
/// assert!(log.finished_before_started("a", "b"));
/// # }
/// ```
pub struct RecordingTask {
    id: TaskId,
    log: Arc<ExecutionLog>,
    delay: Duration,
    output: Option<Value>,
}

impl RecordingTask {
    /// The default output is the task's ID as a JSON string.
    pub fn new(id: impl Into<TaskId>, log: &Arc<ExecutionLog>) -> Self {
        Self {
            id: id.into(),
            log: Arc::clone(log),
            delay: Duration::ZERO,
            output: None,
        }
    }

    /// Sleep for `delay` inside the body.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

#[async_trait]
impl Task for RecordingTask {
    async fn run(&self, inputs: TaskInputs) -> Result<Value, TaskError> {
        let order = self.log.next_order.fetch_add(1, Ordering::SeqCst);
        let now_running = self.log.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak.fetch_max(now_running, Ordering::SeqCst);
        let started = Instant::now();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut received: Vec<TaskId> = inputs.iter().map(|(id, _)| id.clone()).collect();
        received.sort();
        self.log.running.fetch_sub(1, Ordering::SeqCst);
        lock(&self.log.records).push(ExecutionRecord {
            task: self.id.clone(),
            order,
            started,
            finished: Instant::now(),
            inputs: received,
        });

        Ok(self
            .output
            .clone()
            .unwrap_or_else(|| json!(self.id.as_str())))
    }
}

/// A task that fails a fixed number of times, then succeeds.
///
/// ```
/// use tessera::testing::FlakyTask;
///
/// // Fails 2 times, then succeeds on the 3rd attempt
/// let task = FlakyTask::new(2);
/// ```
pub struct FlakyTask {
    state: tokio::sync::Mutex<FlakyState>,
    total_failures: u32,
    error_message: String,
    transient: bool,
    output: Value,
    retry_policy: Option<RetryPolicy>,
}

struct FlakyState {
    failures_remaining: u32,
    call_count: u32,
}

impl FlakyTask {
    /// Create a task that fails `fail_count` times then returns `true`.
    pub fn new(fail_count: u32) -> Self {
        Self {
            state: tokio::sync::Mutex::new(FlakyState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            total_failures: fail_count,
            error_message: "intentional test failure".to_string(),
            transient: false,
            output: json!(true),
            retry_policy: None,
        }
    }

    /// A task that never succeeds.
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Fail with [`TaskError::Transient`] instead of [`TaskError::ExecutionFailed`].
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    /// Override the graph's retry policy for this task.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }

    pub async fn failures_remaining(&self) -> u32 {
        self.state.lock().await.failures_remaining
    }

    /// Reset the failure counter for reuse.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.failures_remaining = self.total_failures;
        state.call_count = 0;
    }
}

#[async_trait]
impl Task for FlakyTask {
    async fn run(&self, _inputs: TaskInputs) -> Result<Value, TaskError> {
        // Check-and-decrement under one lock so concurrent runs stay consistent.
        let mut state = self.state.lock().await;
        state.call_count += 1;

        if state.failures_remaining == 0 {
            return Ok(self.output.clone());
        }
        state.failures_remaining -= 1;
        if self.transient {
            Err(TaskError::Transient(self.error_message.clone()))
        } else {
            Err(TaskError::ExecutionFailed(self.error_message.clone()))
        }
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy
    }
}

/// A task that counts how often its body runs.
#[derive(Debug)]
pub struct CountingTask {
    calls: AtomicU32,
    output: Value,
}

impl CountingTask {
    pub fn new(output: Value) -> Self {
        Self {
            calls: AtomicU32::new(0),
            output,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for CountingTask {
    async fn run(&self, _inputs: TaskInputs) -> Result<Value, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// A progress reporter that keeps every update.
#[derive(Debug, Default)]
pub struct ProgressRecorder {
    updates: Mutex<Vec<Progress>>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<Progress> {
        lock(&self.updates).clone()
    }

    pub fn percents(&self) -> Vec<u8> {
        lock(&self.updates).iter().map(|p| p.percent).collect()
    }

    pub fn last(&self) -> Option<Progress> {
        lock(&self.updates).last().cloned()
    }

    /// True if percentages never decreased.
    pub fn is_monotonic(&self) -> bool {
        self.percents().windows(2).all(|pair| pair[0] <= pair[1])
    }
}

impl ProgressReporter for ProgressRecorder {
    fn report(&self, progress: &Progress) {
        lock(&self.updates).push(progress.clone());
    }
}

/// Result of a [`TestHarness`] run.
#[derive(Debug)]
pub struct TestResult {
    pub outcome: Result<HashMap<TaskId, Value>, GraphError>,
    pub progress: Vec<Progress>,
}

/// Runs graphs with a fixed concurrency limit and records progress.
///
/// ```ignore
/// let result = TestHarness::new()
///     .with_concurrency(2)
///     .execute_and_assert_success(&graph)
///     .await;
/// assert_eq!(result.progress.last().unwrap().percent, 100);
/// ```
pub struct TestHarness {
    max_concurrency: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        Self { max_concurrency: 4 }
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Execute every task of `graph`.
    pub async fn execute(&self, graph: &TaskGraph) -> TestResult {
        let recorder = ProgressRecorder::new();
        let outcome = graph
            .execute_all(self.max_concurrency, Some(&recorder))
            .await;
        TestResult {
            outcome,
            progress: recorder.updates(),
        }
    }

    /// Execute and assert success.
    pub async fn execute_and_assert_success(&self, graph: &TaskGraph) -> TestResult {
        let result = self.execute(graph).await;
        if let Err(err) = &result.outcome {
            panic!("Expected graph to succeed, but it failed: {}", err);
        }
        result
    }

    /// Execute and assert failure.
    pub async fn execute_and_assert_failure(&self, graph: &TaskGraph) -> TestResult {
        let result = self.execute(graph).await;
        assert!(
            result.outcome.is_err(),
            "Expected graph to fail, but it succeeded"
        );
        result
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
