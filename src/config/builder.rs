//! Graph builder from pipeline configuration.
//!
//! Converts a [`PipelineConfig`] into a runnable [`TaskGraph`] of
//! [`CommandTask`]s.

use std::sync::Arc;

use crate::core::retry::RetryPolicy;
use crate::execution::{CommandTask, TaskGraph};

use super::types::{PipelineConfig, TaskConfig};

/// Builder for creating task graphs from pipeline configuration.
pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Build a graph from a pipeline. Tasks are registered in file order and
    /// the graph uses the pipeline's retry policy.
    pub fn build(config: &PipelineConfig) -> TaskGraph {
        let graph = TaskGraph::new().with_retry_policy(config.graph.retry_policy());

        for task_config in &config.tasks {
            let task = Self::build_task(config, task_config);
            graph.register(
                task_config.id.as_str(),
                Arc::new(task),
                task_config.depends_on.iter().map(String::as_str),
            );
        }

        graph
    }

    /// Build a command task, merging pipeline and task environments.
    pub fn build_task(pipeline: &PipelineConfig, config: &TaskConfig) -> CommandTask {
        let mut builder = CommandTask::shell(&config.command)
            .environment(pipeline.environment.merged_with(&config.environment));

        if let Some(description) = &config.description {
            builder = builder.description(description);
        }
        if let Some(dir) = &config.working_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(max) = config.max_attempts {
            builder = builder.retry_policy(RetryPolicy::max_attempts(max));
        }

        builder.build()
    }
}

impl PipelineConfig {
    /// Build a runnable graph from this pipeline.
    pub fn build_graph(&self) -> TaskGraph {
        PipelineBuilder::build(self)
    }
}
