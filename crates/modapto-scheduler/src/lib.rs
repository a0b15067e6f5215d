//! modapto-scheduler: recurring smart-service task scheduling.
//!
//! Keeps exactly one cancellable timer per persisted task, fires the
//! task-type handler when it is due, and reschedules: one period later on
//! success, a fixed retry delay later on failure. On startup it recovers
//! every task from the store, catching up overdue ones once.

pub mod clock;
pub mod events;
pub mod handlers;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, SystemClock};
pub use events::{SchedulerEvent, spawn_event_listener};
pub use handlers::TaskHandlers;
pub use scheduler::Scheduler;

use modapto_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduled task not found: {0}")]
    NotFound(String),
    #[error("Task persistence failed: {0}")]
    Persistence(#[from] StorageError),
    #[error("Scheduler is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
