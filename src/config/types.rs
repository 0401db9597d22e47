//! Configuration type definitions.
//!
//! [`GraphConfig`] holds the execution knobs of a graph run. [`PipelineConfig`]
//! describes a complete pipeline of shell commands that the `tessera` binary
//! can run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::core::environment::Environment;
use crate::core::retry::RetryPolicy;

use super::error::ConfigError;

fn default_max_concurrency() -> usize {
    4
}

/// Execution settings for one graph run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Upper bound on concurrently running task bodies.
    pub max_concurrency: usize,
    /// Graph-wide retry policy.
    pub retry: RetryConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

impl GraphConfig {
    /// The retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    /// Check field values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_concurrency cannot be zero".into(),
            ));
        }
        self.retry.validate()
    }
}

/// Retry configuration.
///
/// Without `max_attempts`, failing tasks are relaunched until they succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per task, including the first.
    pub max_attempts: Option<u32>,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::from(self.max_attempts)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts cannot be zero".into(),
            ));
        }
        Ok(())
    }
}

/// A pipeline of shell commands (pipeline YAML file).
///
/// ```yaml
/// name: episode_render
/// max_concurrency: 2
/// retry:
///   max_attempts: 3
/// environment:
///   OUTPUT_DIR: /renders
/// tasks:
///   - id: script
///     command: cat script.txt
///   - id: render
///     command: render --script "$TESSERA_INPUT_SCRIPT"
///     depends_on: [script]
///     timeout_secs: 600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Execution settings.
    #[serde(flatten)]
    pub graph: GraphConfig,
    /// Variables shared by every task.
    #[serde(default)]
    pub environment: Environment,
    /// Task definitions, in registration order.
    pub tasks: Vec<TaskConfig>,
}

impl PipelineConfig {
    /// Check field values.
    ///
    /// Dependencies on unknown tasks and cycles are not rejected here. They
    /// surface as a deadlock when the pipeline runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }
        if self.tasks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "pipeline must have at least one task".into(),
            ));
        }
        self.graph.validate()?;

        let mut ids = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !ids.insert(task.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
        }
        Ok(())
    }

    /// Look up a task definition by id.
    pub fn task(&self, id: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

/// One command task in a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task identifier (unique within the pipeline).
    pub id: String,
    /// Shell command, run with `sh -c`.
    pub command: String,
    /// Optional description.
    pub description: Option<String>,
    /// Tasks whose outputs this task consumes.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Task-level variables, overriding pipeline-level ones.
    #[serde(default)]
    pub environment: Environment,
    /// Working directory of the command.
    pub working_dir: Option<String>,
    /// Timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Overrides the pipeline's `retry.max_attempts` for this task.
    pub max_attempts: Option<u32>,
}

impl TaskConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::MissingField("tasks[].id".into()));
        }
        if self.command.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "task '{}' has an empty command",
                self.id
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "task '{}': timeout_secs cannot be zero",
                self.id
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "task '{}': max_attempts cannot be zero",
                self.id
            )));
        }
        Ok(())
    }
}
