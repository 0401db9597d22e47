//! Progress reporting tests.

use serde_json::json;
use std::sync::Arc;
use tessera::testing::{CountingTask, ExecutionLog, FlakyTask, ProgressRecorder};
use tessera::{Progress, TaskGraph, TaskId};

use crate::common::{diamond, record};

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_100() {
    let log = ExecutionLog::new();
    let graph = diamond(&log, 5);
    let recorder = ProgressRecorder::new();

    graph.execute_all(2, Some(&recorder)).await.unwrap();

    assert!(recorder.is_monotonic());
    assert_eq!(recorder.percents(), vec![0, 25, 50, 75, 100, 100]);
    let last = recorder.last().unwrap();
    assert_eq!(last.completed, 4);
    assert_eq!(last.total, 4);
    assert_eq!(last.message, "all 4 tasks completed");
}

#[tokio::test]
async fn test_progress_uses_floor() {
    let log = ExecutionLog::new();
    let graph = TaskGraph::new();
    record(&graph, &log, "one", &[], 0);
    record(&graph, &log, "two", &["one"], 0);
    record(&graph, &log, "three", &["two"], 0);
    let recorder = ProgressRecorder::new();

    graph.execute_all(1, Some(&recorder)).await.unwrap();

    assert_eq!(recorder.percents(), vec![0, 33, 66, 100, 100]);
}

#[tokio::test]
async fn test_progress_messages_name_completed_tasks() {
    let graph = TaskGraph::new();
    graph.register("title_card", Arc::new(CountingTask::new(json!(1))), Vec::<TaskId>::new());
    let recorder = ProgressRecorder::new();

    graph.execute_all(1, Some(&recorder)).await.unwrap();

    let messages: Vec<String> = recorder.updates().into_iter().map(|p| p.message).collect();
    assert_eq!(messages[0], "starting 1 task(s)");
    assert_eq!(messages[1], "completed 'title_card' (1/1)");
}

#[tokio::test]
async fn test_failed_attempts_do_not_advance_progress() {
    let graph = TaskGraph::new();
    graph.register("flaky", Arc::new(FlakyTask::new(2)), Vec::<TaskId>::new());
    let recorder = ProgressRecorder::new();

    graph.execute_all(1, Some(&recorder)).await.unwrap();

    // start, success, finish
    assert_eq!(recorder.percents(), vec![0, 100, 100]);
    assert_eq!(recorder.last().unwrap().failed_attempts, 2);
    assert!(recorder.last().unwrap().message.contains("2 failed attempt(s)"));
}

#[tokio::test]
async fn test_closure_reporter() {
    let log = ExecutionLog::new();
    let graph = diamond(&log, 0);
    let lines = std::sync::Mutex::new(Vec::new());
    let reporter = |p: &Progress| lines.lock().unwrap().push(p.to_string());

    graph.execute_all(4, Some(&reporter)).await.unwrap();

    let lines = lines.into_inner().unwrap();
    assert_eq!(lines.first().map(String::as_str), Some("[  0%] starting 4 task(s)"));
    assert_eq!(lines.last().map(String::as_str), Some("[100%] all 4 tasks completed"));
}

#[tokio::test]
async fn test_deadlocked_run_reports_halt() {
    let graph = TaskGraph::new();
    graph.register("a", Arc::new(CountingTask::new(json!(1))), ["b"]);
    graph.register("b", Arc::new(CountingTask::new(json!(2))), ["a"]);
    let recorder = ProgressRecorder::new();

    graph.execute_all(1, Some(&recorder)).await.unwrap_err();

    assert_eq!(recorder.percents(), vec![0, 100]);
    let last = recorder.last().unwrap();
    assert!(last.halted);
    assert_eq!(last.completed, 0);
    assert!(last.message.starts_with("halted: deadlock"));
}

#[tokio::test]
async fn test_empty_graph_reports_start_and_finish() {
    let graph = TaskGraph::new();
    let recorder = ProgressRecorder::new();

    graph.execute_all(1, Some(&recorder)).await.unwrap();

    assert_eq!(recorder.percents(), vec![0, 100]);
    assert!(!recorder.last().unwrap().halted);
}

#[tokio::test]
async fn test_rerun_after_single_task_starts_at_zero() {
    let log = ExecutionLog::new();
    let graph = TaskGraph::new();
    record(&graph, &log, "a", &[], 0);
    record(&graph, &log, "b", &["a"], 0);
    graph.execute_task(&TaskId::new("a")).await.unwrap();
    let recorder = ProgressRecorder::new();

    graph.execute_all(1, Some(&recorder)).await.unwrap();

    assert_eq!(recorder.percents(), vec![0, 50, 100]);
    assert!(recorder.is_monotonic());
    assert_eq!(log.len(), 2);
}
