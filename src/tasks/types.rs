//! Task status state machine, internal record, and wire snapshot.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::tasks::error::TaskError;
use crate::types::Event;

/// Event name under which task progress is broadcast.
pub const TASK_PROGRESS_EVENT: &str = "task/progress";

/// Fixed error message stored on a task cancelled by `task/cancel`.
pub const CANCELLED_MESSAGE: &str = "cancelled by user";

/// Task lifecycle status.
///
/// # State machine
///
/// ```text
/// Pending -> Running, Cancelled
/// Running -> Completed, Failed, Cancelled
/// Completed | Failed | Cancelled -> (terminal, no transitions)
/// ```
///
/// Terminal states reject every transition, including self-transitions, so a
/// task that has already completed cannot be cancelled and a cancelled task
/// cannot be completed by a late-finishing body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet picked up by the scheduler.
    Pending,
    /// Actively executing.
    Running,
    /// Finished successfully (terminal).
    Completed,
    /// Finished with a failure (terminal).
    Failed,
    /// Cancel was requested before the task reached a terminal state
    /// (terminal).
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskStatus {
    /// Returns `true` for `Completed`, `Failed`, and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if transitioning from this status to `next` is valid.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::Pending => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Validates a transition, returning [`TaskError::InvalidTransition`]
    /// with context when rejected.
    pub fn validate_transition(&self, task_id: &str, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                task_id: task_id.to_string(),
                from: *self,
                to: *next,
            })
        }
    }
}

/// Read-only snapshot of a task, as serialized on the wire for `task/get`
/// and `task/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Globally unique task ID (`task_<seq>_<millis>` composite).
    pub task_id: String,

    /// Name of the operation this task is running.
    pub tool: String,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Completion percentage, 0-100, non-decreasing while running.
    pub progress: u8,

    /// Latest human-readable status text, if any was reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,

    /// Operation result; set only on `completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure reason; set only on `failed` and `cancelled`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// ISO 8601 creation timestamp.
    pub created_at: String,

    /// ISO 8601 timestamp of the last state or progress change.
    pub last_updated_at: String,
}

/// Internal mutable state of a task. Owned exclusively by the task table;
/// everything outside the manager sees only [`TaskSnapshot`] copies.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Unique task ID.
    pub task_id: String,
    /// Operation name.
    pub tool: String,
    /// Parameter bag captured at creation.
    pub arguments: Map<String, Value>,
    /// Current status.
    pub status: TaskStatus,
    /// Completion percentage.
    pub progress: u8,
    /// Latest progress text.
    pub progress_message: Option<String>,
    /// Result, on `Completed`.
    pub result: Option<Value>,
    /// Failure reason, on `Failed`/`Cancelled`.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub last_updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates a record in the `Pending` state.
    pub fn new(task_id: String, tool: String, arguments: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            tool,
            arguments,
            status: TaskStatus::Pending,
            progress: 0,
            progress_message: None,
            result: None,
            error: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Marks the record as mutated now.
    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }

    /// Produces the wire-format snapshot of this record.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            tool: self.tool.clone(),
            status: self.status,
            progress: self.progress,
            progress_message: self.progress_message.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            last_updated_at: self
                .last_updated_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Builds the `task/progress` event broadcast to all connections.
pub fn progress_event(task_id: &str, progress: u8, message: &str) -> Event {
    Event::new(
        TASK_PROGRESS_EVENT,
        json!({
            "taskId": task_id,
            "progress": progress,
            "total": 100,
            "message": message,
        }),
    )
}
