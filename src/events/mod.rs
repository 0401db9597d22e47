//! Lifecycle events and event handling.
//!
//! This module provides event emission for task and run lifecycle events,
//! enabling observability into graph execution without coupling the executor
//! to any particular sink.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{RunId, TaskId};

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// `execute_all` has started.
    RunStarted {
        run_id: RunId,
        task_count: usize,
        timestamp: Instant,
    },

    /// A task body has been admitted and started.
    TaskStarted {
        task_id: TaskId,
        run_id: RunId,
        timestamp: Instant,
    },

    /// A task completed successfully and its output was stored.
    TaskCompleted {
        task_id: TaskId,
        run_id: RunId,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task body returned an error.
    TaskFailed {
        task_id: TaskId,
        run_id: RunId,
        error: String,
        timestamp: Instant,
    },

    /// A failed task will be relaunched on the next scan.
    TaskRetrying {
        task_id: TaskId,
        run_id: RunId,
        /// The attempt number that just failed (1-indexed).
        attempt: u32,
        /// Attempt limit, or `None` when retries are unbounded.
        max_attempts: Option<u32>,
        timestamp: Instant,
    },

    /// A task exhausted its retry policy and will not be relaunched.
    TaskAbandoned {
        task_id: TaskId,
        run_id: RunId,
        attempts: u32,
        timestamp: Instant,
    },

    /// `execute_all` finished, successfully or not.
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. } => *timestamp,
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::TaskCompleted { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::TaskRetrying { timestamp, .. } => *timestamp,
            Event::TaskAbandoned { timestamp, .. } => *timestamp,
            Event::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskStarted { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::TaskRetrying { task_id, .. }
            | Event::TaskAbandoned { task_id, .. } => Some(task_id),
            Event::RunStarted { .. } | Event::RunCompleted { .. } => None,
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(run_id: RunId, task_count: usize) -> Self {
        Event::RunStarted {
            run_id,
            task_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(task_id: TaskId, run_id: RunId) -> Self {
        Event::TaskStarted {
            task_id,
            run_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(task_id: TaskId, run_id: RunId, duration: Duration) -> Self {
        Event::TaskCompleted {
            task_id,
            run_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(task_id: TaskId, run_id: RunId, error: String) -> Self {
        Event::TaskFailed {
            task_id,
            run_id,
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskRetrying event.
    pub fn task_retrying(
        task_id: TaskId,
        run_id: RunId,
        attempt: u32,
        max_attempts: Option<u32>,
    ) -> Self {
        Event::TaskRetrying {
            task_id,
            run_id,
            attempt,
            max_attempts,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskAbandoned event.
    pub fn task_abandoned(task_id: TaskId, run_id: RunId, attempts: u32) -> Self {
        Event::TaskAbandoned {
            task_id,
            run_id,
            attempts,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunCompleted event.
    pub fn run_completed(run_id: RunId, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            run_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
