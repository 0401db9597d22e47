//! Progress reporting for graph runs.
//!
//! A [`ProgressReporter`] is injected into `execute_all` and receives coarse
//! [`Progress`] updates: once at start with 0%, once per successful task, and
//! once at the end with 100%. The final update is sent even when the run
//! halts, so consumers check [`Progress::halted`] to tell a resolved graph from
//! an aborted one. Any `Fn(&Progress) + Send + Sync` closure is a reporter.

use serde::Serialize;
use std::fmt;

/// One progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// `floor(100 * completed / total)`, in `0..=100`.
    pub percent: u8,
    /// Human-readable description of the update.
    pub message: String,
    /// Tasks completed during this run.
    pub completed: usize,
    /// Registered tasks.
    pub total: usize,
    /// Failed attempts so far in this run. A run can reach 100% after
    /// failures that were later retried successfully.
    pub failed_attempts: usize,
    /// Set on the final update of a run that stopped with tasks unresolved.
    pub halted: bool,
}

impl Progress {
    /// Build an update, computing the percentage from `completed / total`.
    pub fn new(completed: usize, total: usize, failed_attempts: usize, message: impl Into<String>) -> Self {
        Self {
            percent: percent(completed, total),
            message: message.into(),
            completed,
            total,
            failed_attempts,
            halted: false,
        }
    }

    /// The first update of a run. Always 0%, whatever is already stored.
    pub fn started(total: usize) -> Self {
        Self {
            percent: 0,
            message: format!("starting {} task(s)", total),
            completed: 0,
            total,
            failed_attempts: 0,
            halted: false,
        }
    }

    /// Build the final update of a fully resolved run.
    pub fn finished(completed: usize, total: usize, failed_attempts: usize) -> Self {
        let message = if failed_attempts == 0 {
            format!("all {} tasks completed", total)
        } else {
            format!(
                "all {} tasks completed after {} failed attempt(s)",
                total, failed_attempts
            )
        };
        Self {
            percent: 100,
            message,
            completed,
            total,
            failed_attempts,
            halted: false,
        }
    }

    /// Build the final update of a run that stopped before every task had a
    /// result. Still 100%: nothing more will happen in this run.
    pub fn halted(
        completed: usize,
        total: usize,
        failed_attempts: usize,
        reason: impl fmt::Display,
    ) -> Self {
        Self {
            percent: 100,
            message: format!("halted: {}", reason),
            completed,
            total,
            failed_attempts,
            halted: true,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>3}%] {}", self.percent, self.message)
    }
}

/// `floor(100 * completed / total)`. An empty graph counts as finished.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total);
    // Bounded by 100, so the narrowing cannot truncate.
    ((completed * 100) / total) as u8
}

/// Receiver of progress updates.
pub trait ProgressReporter: Send + Sync {
    /// Handle one update.
    fn report(&self, progress: &Progress);
}

impl<F> ProgressReporter for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn report(&self, progress: &Progress) {
        self(progress)
    }
}
