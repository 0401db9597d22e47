//! Retry policy applied to tasks that fail inside a graph run.
//!
//! A failed task is not recorded in the result store, so on the next
//! readiness scan it is ready again. [`RetryPolicy::Unbounded`] keeps it that
//! way and the task is relaunched for as long as it keeps failing.
//! [`RetryPolicy::MaxAttempts`] gives up after a fixed number of attempts and
//! moves the task to the failed set, which ends the run once nothing else can
//! make progress.

use serde::{Deserialize, Serialize};

/// How often a failing task is relaunched during `execute_all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Relaunch on every scan until the task succeeds. The run only ends if
    /// the caller cancels it.
    #[default]
    Unbounded,

    /// Total number of attempts, including the first one. A value of 1 means
    /// the task is never retried.
    MaxAttempts(u32),
}

impl RetryPolicy {
    /// Create a policy that never relaunches a failed task.
    pub fn none() -> Self {
        Self::MaxAttempts(1)
    }

    /// Create a policy allowing `attempts` total attempts. Zero is treated as one.
    pub fn max_attempts(attempts: u32) -> Self {
        Self::MaxAttempts(attempts.max(1))
    }

    /// Check if another attempt is allowed after `attempts` failed ones.
    pub fn should_retry(&self, attempts: u32) -> bool {
        match self {
            Self::Unbounded => true,
            Self::MaxAttempts(max) => attempts < (*max).max(1),
        }
    }

    /// Check if this policy can ever give up on a task.
    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::MaxAttempts(_))
    }

    /// The attempt limit, if any.
    pub fn limit(&self) -> Option<u32> {
        match self {
            Self::Unbounded => None,
            Self::MaxAttempts(max) => Some((*max).max(1)),
        }
    }
}

impl From<Option<u32>> for RetryPolicy {
    fn from(max_attempts: Option<u32>) -> Self {
        max_attempts.map_or(Self::Unbounded, Self::max_attempts)
    }
}
