//! Asynchronous task subsystem.
//!
//! Tasks are coordination primitives for long-running operations (a
//! multi-second compile, a device flash). A caller fires the operation and
//! immediately receives a task ID; the work runs as an independently
//! scheduled unit, advances through a state machine
//! (`pending -> running -> completed`/`failed`/`cancelled`), and reports
//! progress as events broadcast to every live connection. A task's identity
//! and terminal snapshot outlive the connection that created it.
//!
//! # Module organization
//!
//! - [`types`] — status state machine, internal record, wire snapshot
//! - [`error`] — task-level error type
//! - [`manager`] — the task table and execution scheduling
//! - [`progress`] — the handle runners use to report progress

pub mod error;
pub mod manager;
pub mod progress;
pub mod types;

pub use error::TaskError;
pub use manager::{TaskManager, TaskRunner};
pub use progress::ProgressHandle;
pub use types::{TaskSnapshot, TaskStatus, TASK_PROGRESS_EVENT};
