//! The task table and execution scheduling.
//!
//! [`TaskManager`] exclusively owns every task's mutable state. Connections
//! never touch a task directly: they create tasks through a domain handler
//! calling [`TaskManager::spawn`] and read [`TaskSnapshot`] copies via
//! [`TaskManager::get`]. The table grows without bound — nothing prunes
//! terminal tasks, so a terminal snapshot stays readable indefinitely.
//!
//! Task state mutation is serialized per task by the table's per-entry
//! exclusive locks. That is what makes the cancel-vs-completion race safe:
//! whichever side transitions first wins, and the loser observes a terminal
//! state and backs off.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::tasks::error::TaskError;
use crate::tasks::progress::ProgressHandle;
use crate::tasks::types::{progress_event, TaskRecord, TaskSnapshot, TaskStatus, CANCELLED_MESSAGE};
use crate::types::Event;

/// Executes the real work behind a task.
///
/// The manager is agnostic to what the work is; implementations dispatch on
/// the tool name and call the backend services. The handle lets the body
/// report progress and poll for cooperative cancellation.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Runs `tool` with `arguments` to completion.
    ///
    /// The returned value becomes the task's stored result; an error becomes
    /// the stored failure reason.
    async fn run(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
        progress: ProgressHandle,
    ) -> Result<Value>;
}

pub(crate) struct ManagerInner {
    pub(crate) tasks: DashMap<String, TaskRecord>,
    pub(crate) events: broadcast::Sender<Event>,
    next_seq: AtomicU64,
    runner: Arc<dyn TaskRunner>,
}

/// Owner of all task lifecycles: creation, state transitions, progress
/// emission, cancellation, and terminal-result storage.
///
/// Cheaply cloneable; clones share one table.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    /// Creates a manager that executes task bodies with `runner` and
    /// broadcasts progress events on `events`.
    pub fn new(runner: Arc<dyn TaskRunner>, events: broadcast::Sender<Event>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                tasks: DashMap::new(),
                events,
                next_seq: AtomicU64::new(0),
                runner,
            }),
        }
    }

    /// Creates a task for `tool` and schedules its execution.
    ///
    /// Returns the task ID immediately; the body runs as an independently
    /// scheduled unit and never synchronously within this call, so the
    /// creator always receives the ID while the task is still `Pending`.
    pub fn spawn(&self, tool: &str, arguments: Map<String, Value>) -> String {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let task_id = format!("task_{}_{}", seq, Utc::now().timestamp_millis());

        let record = TaskRecord::new(task_id.clone(), tool.to_string(), arguments);
        self.inner.tasks.insert(task_id.clone(), record);
        debug!(task_id = %task_id, tool = %tool, "task created");

        let inner = Arc::clone(&self.inner);
        let id = task_id.clone();
        tokio::spawn(async move {
            execute(inner, id).await;
        });

        task_id
    }

    /// Returns a read-only snapshot of a task.
    pub fn get(&self, task_id: &str) -> std::result::Result<TaskSnapshot, TaskError> {
        self.inner
            .tasks
            .get(task_id)
            .map(|record| record.snapshot())
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Requests cancellation of a task.
    ///
    /// Effective only from `Pending` or `Running`: the task transitions to
    /// `Cancelled` with a fixed failure reason and `true` is returned. A task
    /// already in a terminal state is left untouched and `false` is returned.
    ///
    /// Cancellation marks the task; it does not forcibly interrupt work in
    /// flight. A body that keeps running will have its eventual outcome
    /// discarded, and may poll [`ProgressHandle::is_cancelled`] to stop
    /// early.
    pub fn cancel(&self, task_id: &str) -> std::result::Result<bool, TaskError> {
        let mut record = self
            .inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_string(),
            })?;

        if record.status.is_terminal() {
            debug!(task_id = %task_id, status = %record.status, "cancel on terminal task is a no-op");
            return Ok(false);
        }

        record.status = TaskStatus::Cancelled;
        record.error = Some(CANCELLED_MESSAGE.to_string());
        record.touch();
        debug!(task_id = %task_id, "task cancelled");
        Ok(true)
    }

    /// Returns snapshots of all tasks, newest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.task_id.cmp(&a.task_id)));
        snapshots
    }

    /// Number of tasks ever created and still tracked.
    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Returns `true` if no tasks are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    pub(crate) fn inner(&self) -> &Arc<ManagerInner> {
        &self.inner
    }
}

/// The spawned body of one task: transition to `Running`, run the tool,
/// store the outcome — unless a concurrent cancel got there first.
async fn execute(inner: Arc<ManagerInner>, task_id: String) {
    let (tool, arguments) = {
        let Some(mut record) = inner.tasks.get_mut(&task_id) else {
            return;
        };
        if record.status != TaskStatus::Pending {
            // Cancelled before the scheduler picked it up.
            debug!(task_id = %task_id, status = %record.status, "skipping execution");
            return;
        }
        record.status = TaskStatus::Running;
        record.touch();
        (record.tool.clone(), record.arguments.clone())
    };

    let _ = inner
        .events
        .send(progress_event(&task_id, 0, "starting"));

    let handle = ProgressHandle::new(Arc::clone(&inner), task_id.clone());
    let outcome = inner.runner.run(&tool, arguments, handle).await;

    let Some(mut record) = inner.tasks.get_mut(&task_id) else {
        return;
    };
    if record.status != TaskStatus::Running {
        // A cancel won the race; the terminal state stands.
        debug!(task_id = %task_id, status = %record.status, "discarding outcome of superseded task");
        return;
    }

    match outcome {
        Ok(result) => {
            record.status = TaskStatus::Completed;
            record.result = Some(result);
            record.touch();
            debug!(task_id = %task_id, tool = %tool, "task completed");
        },
        Err(e) => {
            record.status = TaskStatus::Failed;
            record.error = Some(e.to_string());
            record.touch();
            warn!(task_id = %task_id, tool = %tool, error = %e, "task failed");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tasks::types::TASK_PROGRESS_EVENT;
    use serde_json::json;
    use std::time::Duration;

    /// Toy runner: `build` reports progress and succeeds, `explode` fails,
    /// `hang` sleeps until cancelled or the test ends.
    struct ToyRunner;

    #[async_trait]
    impl TaskRunner for ToyRunner {
        async fn run(
            &self,
            tool: &str,
            arguments: Map<String, Value>,
            progress: ProgressHandle,
        ) -> Result<Value> {
            match tool {
                "build" => {
                    progress.report(30, "compiling");
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    progress.report(90, "linking");
                    Ok(json!({"arguments": arguments}))
                },
                "explode" => Err(Error::handler("toolchain exploded")),
                "hang" => {
                    for _ in 0..1000 {
                        if progress.is_cancelled() {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    Ok(json!(null))
                },
                other => Err(Error::method_not_found(other)),
            }
        }
    }

    fn manager() -> (TaskManager, broadcast::Receiver<Event>) {
        let (events, rx) = broadcast::channel(64);
        (TaskManager::new(Arc::new(ToyRunner), events), rx)
    }

    async fn wait_terminal(manager: &TaskManager, task_id: &str) -> TaskSnapshot {
        for _ in 0..400 {
            let snapshot = manager.get(task_id).unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {task_id} never reached a terminal state");
    }

    // --- Creation and lookup ---

    #[tokio::test]
    async fn spawn_returns_before_any_state_beyond_pending() {
        let (manager, _rx) = manager();
        let task_id = manager.spawn("build", Map::new());

        // On a current-thread runtime nothing has yielded yet, so the body
        // cannot have started; the contract only promises "not completed".
        let snapshot = manager.get(&task_id).unwrap();
        assert!(
            matches!(snapshot.status, TaskStatus::Pending | TaskStatus::Running),
            "unexpected status: {}",
            snapshot.status
        );
    }

    #[tokio::test]
    async fn task_ids_are_distinguishable() {
        let (manager, _rx) = manager();
        let a = manager.spawn("build", Map::new());
        let b = manager.spawn("build", Map::new());
        assert_ne!(a, b);
        assert!(a.starts_with("task_1_"));
        assert!(b.starts_with("task_2_"));
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let (manager, _rx) = manager();
        let result = manager.get("task_999_0");
        assert!(matches!(result, Err(TaskError::NotFound { .. })));
    }

    // --- Lifecycle ---

    #[tokio::test]
    async fn successful_task_stores_result_and_stays_terminal() {
        let (manager, _rx) = manager();
        let args = json!({"fqbn": "x:y:z"}).as_object().cloned().unwrap();
        let task_id = manager.spawn("build", args);

        let snapshot = wait_terminal(&manager, &task_id).await;
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result.unwrap()["arguments"]["fqbn"], "x:y:z");
        assert!(snapshot.error.is_none());

        // Terminal reads are idempotent.
        let again = manager.get(&task_id).unwrap();
        assert_eq!(again.status, TaskStatus::Completed);
        assert_eq!(again.progress, 90);
    }

    #[tokio::test]
    async fn failing_task_stores_stringified_error() {
        let (manager, _rx) = manager();
        let task_id = manager.spawn("explode", Map::new());

        let snapshot = wait_terminal(&manager, &task_id).await;
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("toolchain exploded"));
        assert!(snapshot.result.is_none());
    }

    // --- Cancellation ---

    #[tokio::test]
    async fn cancel_running_task_takes_effect() {
        let (manager, _rx) = manager();
        let task_id = manager.spawn("hang", Map::new());

        // Let it start running.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.cancel(&task_id).unwrap());

        let snapshot = manager.get(&task_id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert_eq!(snapshot.error.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[tokio::test]
    async fn cancel_pending_task_takes_effect_and_body_never_runs() {
        let (manager, mut rx) = manager();
        let task_id = manager.spawn("build", Map::new());

        // No yield yet: still pending.
        assert!(manager.cancel(&task_id).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = manager.get(&task_id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        // The skipped body never emitted its initial progress event.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let (manager, _rx) = manager();
        let task_id = manager.spawn("build", Map::new());
        let before = wait_terminal(&manager, &task_id).await;
        assert_eq!(before.status, TaskStatus::Completed);

        assert!(!manager.cancel(&task_id).unwrap());

        let after = manager.get(&task_id).unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
        assert_eq!(after.result, before.result);
        assert!(after.error.is_none());
    }

    #[tokio::test]
    async fn late_finisher_does_not_overwrite_cancelled_state() {
        let (manager, _rx) = manager();
        let task_id = manager.spawn("hang", Map::new());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.cancel(&task_id).unwrap());

        // The hang body polls is_cancelled and returns Ok; its outcome must
        // be discarded rather than flipping the task to Completed.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let snapshot = manager.get(&task_id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert!(snapshot.result.is_none());
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_not_found() {
        let (manager, _rx) = manager();
        assert!(matches!(
            manager.cancel("task_404_0"),
            Err(TaskError::NotFound { .. })
        ));
    }

    // --- Progress events ---

    #[tokio::test]
    async fn progress_events_are_emitted_in_order() {
        let (manager, mut rx) = manager();
        let task_id = manager.spawn("build", Map::new());
        wait_terminal(&manager, &task_id).await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.event, TASK_PROGRESS_EVENT);
            assert_eq!(event.data["taskId"], task_id.as_str());
            assert_eq!(event.data["total"], 100);
            seen.push(event.data["progress"].as_u64().unwrap());
        }
        assert_eq!(seen, [0, 30, 90]);
    }

    // --- Listing ---

    #[tokio::test]
    async fn list_returns_newest_first() {
        let (manager, _rx) = manager();
        let first = manager.spawn("build", Map::new());
        tokio::time::sleep(Duration::from_millis(3)).await;
        let second = manager.spawn("build", Map::new());

        let listed = manager.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].task_id, second);
        assert_eq!(listed[1].task_id, first);
    }

    #[tokio::test]
    async fn len_tracks_created_tasks() {
        let (manager, _rx) = manager();
        assert!(manager.is_empty());
        manager.spawn("build", Map::new());
        manager.spawn("explode", Map::new());
        assert_eq!(manager.len(), 2);
    }
}
