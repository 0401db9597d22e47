//! Pipelines loaded from YAML and run as shell commands.

use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use tessera::config::PipelineBuilder;
use tessera::testing::TestHarness;
use tessera::{GraphError, TaskId, load_pipeline};

fn pipeline_file(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_yaml_pipeline_end_to_end() {
    let file = pipeline_file(
        r#"
name: storyboard
max_concurrency: 2
environment:
  STUDIO: acme
tasks:
  - id: scenes
    command: echo '["intro", "chase", "outro"]'
  - id: scene_count
    command: echo "$TESSERA_INPUT_SCENES" | grep -o '"[a-z]*"' | wc -l | tr -d ' '
    depends_on: [scenes]
  - id: credits
    command: echo "$STUDIO presents"
  - id: summary
    command: |
      echo "{\"scenes\": $TESSERA_INPUT_SCENE_COUNT, \"credits\": \"$TESSERA_INPUT_CREDITS\"}"
    depends_on: [scene_count, credits]
"#,
    );

    let config = load_pipeline(file.path()).unwrap();
    let graph = PipelineBuilder::build(&config);
    let result = TestHarness::new()
        .with_concurrency(config.graph.max_concurrency)
        .execute_and_assert_success(&graph)
        .await;

    let results = result.outcome.unwrap();
    assert_eq!(results[&TaskId::new("scenes")], json!(["intro", "chase", "outro"]));
    assert_eq!(results[&TaskId::new("credits")], json!("acme presents"));
    assert_eq!(
        results[&TaskId::new("summary")],
        json!({"scenes": 3, "credits": "acme presents"})
    );
}

#[tokio::test]
async fn test_failing_command_with_bounded_retries() {
    let file = pipeline_file(
        r#"
name: broken
retry:
  max_attempts: 2
tasks:
  - id: transcode
    command: echo "codec not found" >&2; exit 3
  - id: upload
    command: echo uploaded
    depends_on: [transcode]
"#,
    );

    let config = load_pipeline(file.path()).unwrap();
    let graph = config.build_graph();
    let err = graph.execute_all(1, None).await.unwrap_err();

    match err {
        GraphError::TasksFailed { failures, .. } => {
            assert_eq!(failures[0].task.as_str(), "transcode");
            assert_eq!(failures[0].attempts, 2);
            assert_eq!(failures[0].error, "command exited with code 3: codec not found");
        }
        other => panic!("Expected TasksFailed, got {:?}", other),
    }
    assert_eq!(graph.attempts(&TaskId::new("upload")), 0);
}

#[tokio::test]
async fn test_unknown_dependency_in_yaml_deadlocks_at_run_time() {
    let file = pipeline_file(
        r#"
name: dangling
tasks:
  - id: render
    command: echo render
  - id: publish
    command: echo publish
    depends_on: [render, approve]
"#,
    );

    let config = load_pipeline(file.path()).unwrap();
    let graph = config.build_graph();
    let err = graph.execute_all(2, None).await.unwrap_err();

    assert!(matches!(err, GraphError::Deadlock { .. }));
    assert_eq!(graph.result(&TaskId::new("render")), Some(json!("render")));
}

#[tokio::test]
async fn test_task_timeout_counts_as_failure() {
    let file = pipeline_file(
        r#"
name: slow
tasks:
  - id: hang
    command: sleep 30
    timeout_secs: 1
    max_attempts: 1
"#,
    );

    let config = load_pipeline(file.path()).unwrap();
    let graph = config.build_graph();
    let err = graph.execute_all(1, None).await.unwrap_err();

    match err {
        GraphError::TasksFailed { failures, .. } => {
            assert!(failures[0].error.contains("timed out"));
        }
        other => panic!("Expected TasksFailed, got {:?}", other),
    }
}
