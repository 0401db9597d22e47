//! Dependency outputs handed to a task body.
//!
//! When a task runs, the executor gathers the output of every declared
//! dependency from the result store and passes them as [`TaskInputs`], keyed
//! by the dependency's [`TaskId`]. Bodies never need to know how the values
//! were produced, only which dependency they came from.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use super::types::TaskId;

/// Errors that can occur when reading dependency outputs.
#[derive(Debug, Error)]
pub enum InputError {
    /// The requested dependency is not part of this task's inputs.
    #[error("no input from dependency '{0}'")]
    Missing(TaskId),

    /// The dependency output could not be converted to the requested type.
    #[error("cannot deserialize input from '{task}': {message}")]
    Deserialize { task: TaskId, message: String },
}

/// Outputs of a task's dependencies, keyed by dependency identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TaskInputs {
    values: HashMap<TaskId, Value>,
}

impl TaskInputs {
    /// Create an empty input set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the raw output of a dependency.
    pub fn get_raw(&self, dependency: &str) -> Option<&Value> {
        self.values.get(&TaskId::new(dependency))
    }

    /// Get the output of a dependency, deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, dependency: &str) -> Result<T, InputError> {
        let value = self
            .get_raw(dependency)
            .ok_or_else(|| InputError::Missing(TaskId::new(dependency)))?;
        serde_json::from_value(value.clone()).map_err(|e| InputError::Deserialize {
            task: TaskId::new(dependency),
            message: e.to_string(),
        })
    }

    /// Get an optional typed value. Returns None if the dependency is absent
    /// or its output has a different shape.
    pub fn get_optional<T: DeserializeOwned>(&self, dependency: &str) -> Option<T> {
        let value = self.get_raw(dependency)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Check whether a dependency output is present.
    pub fn contains(&self, dependency: &str) -> bool {
        self.values.contains_key(&TaskId::new(dependency))
    }

    /// Iterate over `(dependency, output)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &Value)> {
        self.values.iter()
    }

    /// Number of dependency outputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no inputs (a root task).
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Insert a dependency output.
    pub fn insert(&mut self, dependency: impl Into<TaskId>, value: Value) {
        self.values.insert(dependency.into(), value);
    }

    /// Consume into the underlying map.
    pub fn into_map(self) -> HashMap<TaskId, Value> {
        self.values
    }
}

impl FromIterator<(TaskId, Value)> for TaskInputs {
    fn from_iter<I: IntoIterator<Item = (TaskId, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
