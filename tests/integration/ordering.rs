//! Dependency ordering and concurrency tests.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tessera::testing::{CountingTask, ExecutionLog, RecordingTask, TestHarness};
use tessera::{TaskGraph, TaskId, TaskInputs};

use crate::common::{diamond, record, wait_until};

#[tokio::test]
async fn test_diamond_with_two_slots() {
    let log = ExecutionLog::new();
    let graph = diamond(&log, 20);

    let results = graph.execute_all(2, None).await.unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(log.order_of("a"), Some(0));
    assert_eq!(log.order_of("d"), Some(3));
    assert!(log.finished_before_started("a", "b"));
    assert!(log.finished_before_started("a", "c"));
    assert!(log.finished_before_started("b", "d"));
    assert!(log.finished_before_started("c", "d"));
    // b and c run side by side.
    assert_eq!(log.peak_concurrency(), 2);
    assert_eq!(
        log.record("d").unwrap().inputs,
        vec![TaskId::new("b"), TaskId::new("c")]
    );
}

#[tokio::test]
async fn test_every_dependency_finishes_before_its_dependent_starts() {
    // Two layers of fan-out and fan-in, registered out of order.
    let edges: &[(&str, &[&str])] = &[
        ("publish", &["master", "subtitles"]),
        ("master", &["video", "audio"]),
        ("subtitles", &["script"]),
        ("video", &["storyboard"]),
        ("audio", &["script"]),
        ("storyboard", &["script"]),
        ("script", &[]),
    ];
    let log = ExecutionLog::new();
    let graph = TaskGraph::new();
    for (id, deps) in edges {
        record(&graph, &log, id, deps, 5);
    }

    TestHarness::new()
        .with_concurrency(3)
        .execute_and_assert_success(&graph)
        .await;

    assert_eq!(log.len(), edges.len());
    for (id, deps) in edges {
        for dep in *deps {
            assert!(
                log.finished_before_started(dep, id),
                "'{}' started before '{}' finished",
                id,
                dep
            );
        }
    }
}

#[tokio::test]
async fn test_single_slot_never_overlaps() {
    let log = ExecutionLog::new();
    let graph = TaskGraph::new();
    for i in 0..6 {
        record(&graph, &log, &format!("clip_{}", i), &[], 5);
    }

    graph.execute_all(1, None).await.unwrap();

    assert_eq!(log.peak_concurrency(), 1);
    let mut records = log.records();
    records.sort_by_key(|r| r.started);
    for pair in records.windows(2) {
        assert!(pair[0].finished <= pair[1].started);
    }
}

#[tokio::test]
async fn test_concurrency_bound_holds_for_wide_graph() {
    let log = ExecutionLog::new();
    let graph = TaskGraph::new();
    for i in 0..20 {
        record(&graph, &log, &format!("frame_{}", i), &[], 10);
    }

    graph.execute_all(3, None).await.unwrap();

    assert_eq!(log.len(), 20);
    assert!(log.peak_concurrency() <= 3);
}

#[tokio::test]
async fn test_zero_concurrency_is_treated_as_one() {
    let log = ExecutionLog::new();
    let graph = diamond(&log, 1);

    let results = graph.execute_all(0, None).await.unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(log.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_results_flow_between_tasks() {
    let graph = TaskGraph::new();
    graph.register_fn("breakdown", Vec::<TaskId>::new(), |_| async {
        Ok(json!({"scenes": ["cold open", "chase", "finale"]}))
    });
    graph.register_fn("characters", ["breakdown"], |_| async {
        Ok(json!(["Ada", "Grace"]))
    });
    graph.register_fn(
        "shot_list",
        ["breakdown", "characters"],
        |inputs: TaskInputs| async move {
            let breakdown: serde_json::Value = inputs.get("breakdown")?;
            let cast: Vec<String> = inputs.get("characters")?;
            let scenes = breakdown["scenes"].as_array().map_or(0, Vec::len);
            Ok(json!({"shots": scenes * cast.len()}))
        },
    );

    let results = graph.execute_all(2, None).await.unwrap();

    assert_eq!(results[&TaskId::new("shot_list")], json!({"shots": 6}));
}

#[tokio::test]
async fn test_execute_task_returns_cached_output() {
    let counter = Arc::new(CountingTask::new(json!("poster.png")));
    let graph = TaskGraph::new();
    graph.register("poster", counter.clone(), Vec::<TaskId>::new());
    graph.register_fn("share", ["poster"], |inputs: TaskInputs| async move {
        let poster: String = inputs.get("poster")?;
        Ok(json!(format!("shared {}", poster)))
    });

    let id = TaskId::new("poster");
    assert_eq!(graph.execute_task(&id).await.unwrap(), json!("poster.png"));
    assert_eq!(graph.execute_task(&id).await.unwrap(), json!("poster.png"));
    // The full run reuses the stored output as well.
    graph.execute_all(2, None).await.unwrap();

    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn test_second_run_of_resolved_graph_is_a_no_op() {
    let counter = Arc::new(CountingTask::new(json!(1)));
    let graph = TaskGraph::new();
    graph.register("only", counter.clone(), Vec::<TaskId>::new());

    let first = graph.execute_all(1, None).await.unwrap();
    let second = graph.execute_all(1, None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn test_in_progress_is_visible_during_run() {
    let log = ExecutionLog::new();
    let graph = TaskGraph::new();
    graph.register(
        "render",
        Arc::new(RecordingTask::new("render", &log).with_delay(Duration::from_millis(100))),
        Vec::<TaskId>::new(),
    );

    let runner = graph.clone();
    let handle = tokio::spawn(async move { runner.execute_all(1, None).await });

    wait_until("render to start", Duration::from_secs(2), || {
        graph.in_progress() == vec![TaskId::new("render")]
    })
    .await;
    assert!(graph.ready_tasks().is_empty());
    assert!(!graph.is_fully_resolved());

    handle.await.unwrap().unwrap();
    assert!(graph.in_progress().is_empty());
    assert!(graph.is_fully_resolved());
}
