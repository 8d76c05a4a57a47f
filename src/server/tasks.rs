//! The built-in handler for the `task/` method domain.
//!
//! Task creation is not an operation of this domain: long-running backend
//! operations create tasks themselves (a domain handler calls
//! [`TaskManager::spawn`] and answers with the task ID immediately). This
//! service covers the observation side — polling, listing, cancelling —
//! with the method names modeled as a closed sum type carrying typed
//! parameter records, so an unknown suffix is rejected at parse time with
//! the same "method not found" code the router uses for unknown domains.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::server::router::MethodHandler;
use crate::tasks::TaskManager;

/// Parameters naming one task.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskIdParams {
    task_id: String,
}

/// The closed set of `task/` operations.
#[derive(Debug)]
enum TaskMethod {
    /// `task/get` — read-only snapshot of one task.
    Get(TaskIdParams),
    /// `task/cancel` — request cancellation, reporting whether it took
    /// effect.
    Cancel(TaskIdParams),
    /// `task/list` — snapshots of all tasks, newest first.
    List,
}

impl TaskMethod {
    fn parse(suffix: &str, params: Map<String, Value>) -> Result<Self> {
        match suffix {
            "get" => Ok(Self::Get(parse_params("task/get", params)?)),
            "cancel" => Ok(Self::Cancel(parse_params("task/cancel", params)?)),
            "list" => Ok(Self::List),
            other => Err(Error::method_not_found(format!("task/{other}"))),
        }
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(params)).map_err(|e| Error::invalid_params(method, e))
}

/// Method handler exposing the task manager under the `task/` prefix.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use toolbridge::tasks::TaskManager;
/// use toolbridge::{MethodRouter, TaskService};
///
/// # fn wire(manager: TaskManager) -> MethodRouter {
/// MethodRouter::new().register("task", Arc::new(TaskService::new(manager)))
/// # }
/// ```
pub struct TaskService {
    manager: TaskManager,
}

impl TaskService {
    /// Creates the service over a shared task manager.
    pub fn new(manager: TaskManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl MethodHandler for TaskService {
    async fn handle(&self, method: &str, params: Map<String, Value>) -> Result<Value> {
        match TaskMethod::parse(method, params)? {
            TaskMethod::Get(p) => {
                let snapshot = self.manager.get(&p.task_id)?;
                Ok(serde_json::to_value(snapshot)?)
            },
            TaskMethod::Cancel(p) => {
                let cancelled = self.manager.cancel(&p.task_id)?;
                Ok(json!({ "cancelled": cancelled }))
            },
            TaskMethod::List => {
                let tasks = serde_json::to_value(self.manager.list())?;
                Ok(json!({ "tasks": tasks }))
            },
        }
    }
}
