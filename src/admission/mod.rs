//! Admission control
//!
//! A fixed-capacity gate bounding how many uploads execute at the same time.
//! Capacity is a counting semaphore; a ticket is one permit. Waiters are served
//! in the order they asked, and a request that cannot get a ticket within its
//! budget is rejected instead of queueing without bound.
//!
//! # Example
//!
//! ```
//! use s3nd::admission::AdmissionController;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let admission = AdmissionController::new(2);
//! let ticket = admission.acquire(Duration::from_secs(1)).await.unwrap();
//! assert_eq!(admission.in_flight(), 1);
//! ticket.release();
//! assert_eq!(admission.available(), 2);
//! # }
//! ```

use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Admission errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("timed out after {0:?} waiting for an upload slot")]
    Timeout(Duration),

    #[error("admission controller is closed")]
    Closed,
}

/// Process-wide upload capacity pool.
///
/// Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    /// Create a pool with `capacity` tickets
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Total number of tickets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tickets not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Tickets currently held
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait at most `budget` for a ticket.
    ///
    /// A ticket that is free right now is granted even with a zero budget.
    /// When the wait fails nothing is deducted from the pool.
    pub async fn acquire(&self, budget: Duration) -> Result<AdmissionTicket, AdmissionError> {
        let started = Instant::now();
        let deadline = started.checked_add(budget).unwrap_or_else(far_future);
        self.wait(started, deadline).await
    }

    /// Stop handing out tickets.
    ///
    /// Current waiters and every later `acquire` fail with
    /// [`AdmissionError::Closed`]. Tickets already held are unaffected.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    async fn wait(
        &self,
        started: Instant,
        deadline: Instant,
    ) -> Result<AdmissionTicket, AdmissionError> {
        let permit = Arc::clone(&self.semaphore).acquire_owned();

        match tokio::time::timeout_at(deadline, permit).await {
            Ok(Ok(permit)) => {
                let acquired_at = Instant::now();
                metrics::record_admission_wait((acquired_at - started).as_secs_f64());
                metrics::UPLOADS_IN_FLIGHT.inc();
                tracing::debug!(
                    available = self.semaphore.available_permits(),
                    capacity = self.capacity,
                    "Admission ticket granted"
                );
                Ok(AdmissionTicket {
                    _permit: permit,
                    acquired_at,
                })
            }
            Ok(Err(_)) => {
                tracing::debug!("Admission refused, controller closed");
                Err(AdmissionError::Closed)
            }
            Err(_) => {
                let waited = deadline.saturating_duration_since(started);
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    capacity = self.capacity,
                    "Admission timed out"
                );
                Err(AdmissionError::Timeout(waited))
            }
        }
    }
}

fn far_future() -> Instant {
    // Roughly 30 years, same horizon tokio uses for "never"
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

/// The right to run one upload.
///
/// Capacity returns to the pool exactly once, when the ticket is released or
/// dropped on any exit path.
#[derive(Debug)]
pub struct AdmissionTicket {
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl AdmissionTicket {
    /// When the ticket was granted; upload deadlines count from here.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Return the ticket to the pool
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        metrics::UPLOADS_IN_FLIGHT.dec();
    }
}
