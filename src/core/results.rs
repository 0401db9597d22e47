//! Append-only store of task outputs.

use serde_json::Value;
use std::collections::HashMap;

use super::inputs::TaskInputs;
use super::types::TaskId;

/// Outputs of completed tasks.
///
/// Entries are only added when a task succeeds and are never replaced or
/// removed for the lifetime of the graph.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    values: HashMap<TaskId, Value>,
}

impl ResultStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output of a completed task.
    ///
    /// Returns `false` and leaves the store untouched if the task already has
    /// a result.
    pub fn insert(&mut self, id: TaskId, value: Value) -> bool {
        if self.values.contains_key(&id) {
            return false;
        }
        self.values.insert(id, value);
        true
    }

    /// Get the output of a task.
    pub fn get(&self, id: &TaskId) -> Option<&Value> {
        self.values.get(id)
    }

    /// Check if a task has a result.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.values.contains_key(id)
    }

    /// Collect the outputs of `dependencies`.
    ///
    /// Returns the dependencies without a result as the error value.
    pub fn gather(&self, dependencies: &[TaskId]) -> Result<TaskInputs, Vec<TaskId>> {
        let missing: Vec<TaskId> = dependencies
            .iter()
            .filter(|dep| !self.values.contains_key(*dep))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(dependencies
            .iter()
            .filter_map(|dep| self.values.get(dep).map(|v| (dep.clone(), v.clone())))
            .collect())
    }

    /// Number of stored results.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Snapshot of all results.
    pub fn to_map(&self) -> HashMap<TaskId, Value> {
        self.values.clone()
    }
}
