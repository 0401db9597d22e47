//! Task registry: identity, body and declared dependencies of every task.
//!
//! Registration performs no validation. Dependencies may name tasks that are
//! registered later, or never; unknown dependencies only surface when the run
//! can no longer make progress.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::task::Task;
use super::types::TaskId;

/// A registered task: its body and the tasks it depends on.
#[derive(Clone)]
pub struct TaskDefinition {
    /// The task ID.
    pub id: TaskId,

    /// The task implementation.
    pub task: Arc<dyn Task>,

    /// Tasks that must have a result before this one may start.
    pub dependencies: Vec<TaskId>,
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Registered tasks, iterated in registration order.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    /// Definitions indexed by ID.
    definitions: HashMap<TaskId, TaskDefinition>,

    /// IDs in first-registration order.
    order: Vec<TaskId>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, replacing any earlier definition with the same ID.
    ///
    /// A replaced task keeps its original position in the iteration order.
    /// Repeated dependencies are collapsed.
    pub fn register<I, D>(&mut self, id: impl Into<TaskId>, task: Arc<dyn Task>, dependencies: I)
    where
        I: IntoIterator<Item = D>,
        D: Into<TaskId>,
    {
        let id = id.into();
        let mut deps: Vec<TaskId> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        let definition = TaskDefinition {
            id: id.clone(),
            task,
            dependencies: deps,
        };
        if self.definitions.insert(id.clone(), definition).is_none() {
            self.order.push(id);
        }
    }

    /// Get a definition by ID.
    pub fn get(&self, id: &TaskId) -> Option<&TaskDefinition> {
        self.definitions.get(id)
    }

    /// Check if a task is registered.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.definitions.contains_key(id)
    }

    /// Get the declared dependencies of a task.
    pub fn dependencies(&self, id: &TaskId) -> Option<&[TaskId]> {
        self.definitions.get(id).map(|d| d.dependencies.as_slice())
    }

    /// Iterate over definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.order.iter().filter_map(|id| self.definitions.get(id))
    }

    /// All task IDs in registration order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.order.clone()
    }

    /// Get tasks that declare `id` as a dependency.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.iter()
            .filter(|d| d.dependencies.contains(id))
            .map(|d| d.id.clone())
            .collect()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if no task is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
