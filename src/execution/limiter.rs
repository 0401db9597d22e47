//! Concurrency limiter for task bodies.
//!
//! The `ConcurrencyLimiter` is a counting admission gate: at most
//! `max_concurrency` permits are handed out at once. Waiting for a permit is a
//! suspension point, and the permit is released when its guard is dropped,
//! whether the task body succeeded, failed or panicked.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A held admission slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

/// Counting gate bounding how many task bodies run at once.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    /// Maximum number of concurrent admissions.
    max_concurrency: usize,
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    /// Create a limiter with the given bound. A bound of zero is raised to one
    /// so that the graph can always make progress.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    /// Get the maximum concurrency limit.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Get the number of available permits (slots for concurrent execution).
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of admissions currently held.
    pub fn in_use(&self) -> usize {
        self.max_concurrency - self.available_permits()
    }

    /// Wait until a slot is free and take it.
    ///
    /// Returns `None` only if the limiter has been closed, which never happens
    /// through this type's API.
    pub async fn acquire(&self) -> Option<Admission> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        Some(Admission { _permit: permit })
    }

    /// Take a slot without waiting, if one is free.
    pub fn try_acquire(&self) -> Option<Admission> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(Admission { _permit: permit })
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(4) // Default to 4 concurrent tasks
    }
}
