//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tessera::TaskGraph;
use tessera::testing::{ExecutionLog, RecordingTask};

/// Register a recording task under `id`.
pub fn record(
    graph: &TaskGraph,
    log: &Arc<ExecutionLog>,
    id: &str,
    deps: &[&str],
    delay_ms: u64,
) {
    let task = RecordingTask::new(id, log).with_delay(Duration::from_millis(delay_ms));
    graph.register(id, Arc::new(task), deps.iter().copied());
}

/// The diamond graph `a -> {b, c} -> d`.
pub fn diamond(log: &Arc<ExecutionLog>, delay_ms: u64) -> TaskGraph {
    let graph = TaskGraph::new();
    record(&graph, log, "a", &[], delay_ms);
    record(&graph, log, "b", &["a"], delay_ms);
    record(&graph, log, "c", &["a"], delay_ms);
    record(&graph, log, "d", &["b", "c"], delay_ms);
    graph
}

/// Wait for a condition to become true, polling every 5ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_until(what: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let start = tokio::time::Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
