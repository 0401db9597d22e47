//! Failure handling, retry and deadlock tests.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tessera::testing::{CountingTask, FlakyTask, TestHarness};
use tessera::{
    Event, EventBus, EventHandler, GraphError, RetryPolicy, TaskError, TaskGraph, TaskId,
};
use tokio::sync::Mutex;

/// Recording event handler for verifying events.
struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    async fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| pred(e)).count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

fn no_deps() -> Vec<TaskId> {
    Vec::new()
}

#[tokio::test]
async fn test_two_cycle_deadlocks_with_exact_unresolved_set() {
    let graph = TaskGraph::new();
    graph.register("A", Arc::new(CountingTask::new(json!(1))), ["B"]);
    graph.register("B", Arc::new(CountingTask::new(json!(2))), ["A"]);

    let err = graph.execute_all(4, None).await.unwrap_err();

    match err {
        GraphError::Deadlock { unresolved } => {
            assert_eq!(
                unresolved.into_iter().collect::<Vec<_>>(),
                vec![TaskId::new("A"), TaskId::new("B")]
            );
        }
        other => panic!("Expected deadlock, got {:?}", other),
    }
}

#[tokio::test]
async fn test_self_dependency_deadlocks() {
    let graph = TaskGraph::new();
    graph.register("loop", Arc::new(CountingTask::new(json!(0))), ["loop"]);

    let err = graph.execute_all(1, None).await.unwrap_err();

    assert!(matches!(err, GraphError::Deadlock { .. }));
    assert_eq!(err.unresolved().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cycle_downstream_of_healthy_tasks() {
    let healthy = Arc::new(CountingTask::new(json!("ok")));
    let graph = TaskGraph::new();
    graph.register("ingest", healthy.clone(), no_deps());
    graph.register("x", Arc::new(CountingTask::new(json!(1))), ["ingest", "z"]);
    graph.register("y", Arc::new(CountingTask::new(json!(2))), ["x"]);
    graph.register("z", Arc::new(CountingTask::new(json!(3))), ["y"]);

    let err = graph.execute_all(2, None).await.unwrap_err();

    let unresolved: Vec<&str> = err
        .unresolved()
        .unwrap()
        .iter()
        .map(|id| id.as_str())
        .collect();
    assert_eq!(unresolved, vec!["x", "y", "z"]);
    assert_eq!(healthy.calls(), 1);
    assert_eq!(graph.result(&TaskId::new("ingest")), Some(json!("ok")));
}

#[tokio::test]
async fn test_unregistered_dependency_deadlocks() {
    let graph = TaskGraph::new();
    graph.register("encode", Arc::new(CountingTask::new(json!(1))), ["decode"]);

    let err = graph.execute_all(1, None).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "deadlock: no task can start, unresolved tasks: encode"
    );
}

#[tokio::test]
async fn test_flaky_task_recovers_under_default_policy() {
    let flaky = Arc::new(FlakyTask::new(3).with_output(json!("uploaded")));
    let graph = TaskGraph::new();
    graph.register("upload", flaky.clone(), no_deps());
    graph.register_fn("notify", ["upload"], |_| async { Ok(json!("sent")) });

    let result = TestHarness::new()
        .execute_and_assert_success(&graph)
        .await;

    assert_eq!(flaky.call_count().await, 4);
    assert_eq!(graph.attempts(&TaskId::new("upload")), 4);
    let last = result.progress.last().unwrap();
    assert_eq!(last.percent, 100);
    assert_eq!(last.failed_attempts, 3);
}

#[tokio::test]
async fn test_permanent_failure_is_retried_indefinitely_by_default() {
    let doomed = Arc::new(FlakyTask::always_failing());
    let graph = TaskGraph::new();
    graph.register("doomed", doomed.clone(), no_deps());
    graph.register_fn("after", ["doomed"], |_| async { Ok(json!(null)) });

    let outcome = tokio::time::timeout(Duration::from_millis(300), graph.execute_all(2, None)).await;

    assert!(outcome.is_err(), "run should not finish on its own");
    assert!(doomed.call_count().await >= 5);
    assert!(graph.result(&TaskId::new("after")).is_none());
    assert!(graph.failed_tasks().is_empty());
}

#[tokio::test]
async fn test_bounded_policy_reports_failed_tasks() {
    let graph = TaskGraph::new().with_retry_policy(RetryPolicy::max_attempts(2));
    graph.register(
        "voiceover",
        Arc::new(FlakyTask::always_failing().with_error("tts quota exceeded")),
        no_deps(),
    );
    graph.register("music", Arc::new(CountingTask::new(json!("music.wav"))), no_deps());
    graph.register("mix", Arc::new(CountingTask::new(json!("mix.wav"))), ["voiceover", "music"]);

    let result = TestHarness::new()
        .with_concurrency(2)
        .execute_and_assert_failure(&graph)
        .await;

    match result.outcome {
        Err(GraphError::TasksFailed {
            failures,
            unresolved,
        }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].task.as_str(), "voiceover");
            assert_eq!(failures[0].attempts, 2);
            assert!(failures[0].error.contains("tts quota exceeded"));
            assert!(unresolved.contains(&TaskId::new("mix")));
            assert!(!unresolved.contains(&TaskId::new("music")));
        }
        other => panic!("Expected TasksFailed, got {:?}", other),
    }
    let percents: Vec<u8> = result.progress.iter().map(|p| p.percent).collect();
    assert_eq!(percents, vec![0, 33, 100]);
    let last = result.progress.last().unwrap();
    assert!(last.halted);
    assert_eq!(last.failed_attempts, 2);
}

#[tokio::test]
async fn test_task_level_policy_overrides_graph_policy() {
    let strict = Arc::new(FlakyTask::new(1).with_retry_policy(RetryPolicy::none()));
    let graph = TaskGraph::new();
    graph.register("strict", strict.clone(), no_deps());

    let err = graph.execute_all(1, None).await.unwrap_err();

    assert!(matches!(err, GraphError::TasksFailed { .. }));
    assert_eq!(strict.call_count().await, 1);
}

#[tokio::test]
async fn test_execute_task_fails_fast() {
    let graph = TaskGraph::new();
    graph.register(
        "probe",
        Arc::new(FlakyTask::new(1).with_error("camera offline")),
        no_deps(),
    );
    let id = TaskId::new("probe");

    let err = graph.execute_task(&id).await.unwrap_err();
    match &err {
        GraphError::TaskFailed { task, source } => {
            assert_eq!(task, &id);
            assert!(matches!(source, TaskError::ExecutionFailed(msg) if msg == "camera offline"));
        }
        other => panic!("Expected TaskFailed, got {:?}", other),
    }

    // The caller may simply try again.
    assert_eq!(graph.execute_task(&id).await.unwrap(), json!(true));
    assert_eq!(graph.attempts(&id), 2);
}

#[tokio::test]
async fn test_failure_events() {
    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;

    let graph = TaskGraph::new().with_event_bus(bus);
    graph.register("flaky", Arc::new(FlakyTask::new(2)), no_deps());

    graph.execute_all(1, None).await.unwrap();

    assert_eq!(handler.count(|e| matches!(e, Event::TaskFailed { .. })).await, 2);
    assert_eq!(
        handler
            .count(|e| matches!(e, Event::TaskRetrying { max_attempts: None, .. }))
            .await,
        2
    );
    assert_eq!(handler.count(|e| matches!(e, Event::TaskCompleted { .. })).await, 1);
    assert_eq!(
        handler
            .count(|e| matches!(e, Event::RunCompleted { success: true, .. }))
            .await,
        1
    );
}
