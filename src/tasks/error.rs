//! Task subsystem errors.

use crate::tasks::types::TaskStatus;

/// Errors raised by task operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// No task with the given ID exists.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The unknown task ID.
        task_id: String,
    },

    /// A state-machine transition was rejected. Terminal states reject all
    /// transitions; this is what makes a late completion lose to an earlier
    /// cancel (and vice versa).
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task being transitioned.
        task_id: String,
        /// Its current status.
        from: TaskStatus,
        /// The rejected target status.
        to: TaskStatus,
    },
}
