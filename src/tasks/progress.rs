//! Progress reporting for running task bodies.

use std::sync::Arc;

use tracing::debug;

use crate::tasks::manager::ManagerInner;
use crate::tasks::types::{progress_event, TaskStatus};

/// Handle a [`TaskRunner`](crate::tasks::TaskRunner) uses to report progress
/// and poll for cooperative cancellation.
///
/// Each report updates the task's stored progress and broadcasts a
/// `task/progress` event to every live connection, independent of which
/// connection created the task. Progress is kept monotonically
/// non-decreasing: a report below the current value is raised to it, and
/// values above 100 are capped. Reports for a task that is no longer
/// `Running` are suppressed.
#[derive(Clone)]
pub struct ProgressHandle {
    inner: Arc<ManagerInner>,
    task_id: String,
}

impl ProgressHandle {
    pub(crate) fn new(inner: Arc<ManagerInner>, task_id: String) -> Self {
        Self { inner, task_id }
    }

    /// The task this handle reports for.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Records `percent` (0-100) with a human-readable status line and
    /// broadcasts the corresponding event.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        let message = message.into();

        let clamped = {
            let Some(mut record) = self.inner.tasks.get_mut(&self.task_id) else {
                return;
            };
            if record.status != TaskStatus::Running {
                debug!(
                    task_id = %self.task_id,
                    status = %record.status,
                    "suppressing progress for non-running task"
                );
                return;
            }
            let clamped = percent.min(100).max(record.progress);
            record.progress = clamped;
            record.progress_message = Some(message.clone());
            record.touch();
            clamped
        };

        let _ = self
            .inner
            .events
            .send(progress_event(&self.task_id, clamped, &message));
    }

    /// Returns `true` once a cancel has been requested for this task.
    /// Long-running bodies may poll this to stop early; nothing forces them
    /// to.
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .tasks
            .get(&self.task_id)
            .map(|record| record.status == TaskStatus::Cancelled)
            .unwrap_or(true)
    }
}
