//! Local IPC bridge between a tool-calling frontend and long-lived backend
//! services.
//!
//! `toolbridge` carries newline-delimited JSON messages over a platform-local
//! stream (a Unix domain socket on POSIX, a named pipe on Windows) and layers
//! two things on top of the raw transport:
//!
//! - **Correlation**: requests are tagged with caller-assigned IDs and matched
//!   to their responses regardless of arrival order, with per-request
//!   timeouts and exactly-once resolution.
//! - **Tasks**: long-running operations are fired asynchronously, tracked
//!   through a state machine, and report progress as unsolicited events
//!   broadcast to every live connection — independent of the connection that
//!   created them.
//!
//! # Architecture
//!
//! ```text
//! BridgeClient ──frames──▶ socket ──▶ BridgeServer ──▶ MethodRouter ──▶ handlers
//!      ▲                                   │                              │
//!      └────────── events ◀── broadcast ◀──┴── TaskManager ◀── spawn ─────┘
//! ```
//!
//! The client half ([`client::BridgeClient`]) is embedded in the calling
//! process; the server half ([`server::BridgeServer`]) is embedded in the
//! backend daemon. Both share the wire types in [`types`] and the frame codec
//! in [`shared`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolbridge::{BridgeClient, BridgeServer, ClientConfig, MethodRouter, TaskService};
//! use toolbridge::tasks::TaskManager;
//!
//! # async fn example(runner: Arc<dyn toolbridge::tasks::TaskRunner>) -> toolbridge::Result<()> {
//! let (events, _) = tokio::sync::broadcast::channel(64);
//! let manager = TaskManager::new(runner, events.clone());
//!
//! let router = MethodRouter::new()
//!     .register("task", Arc::new(TaskService::new(manager.clone())));
//! let server = BridgeServer::new(router).with_event_source(events);
//! server.start("/tmp/toolbridge.sock").await?;
//!
//! let client = BridgeClient::new(ClientConfig::default());
//! client.connect("/tmp/toolbridge.sock").await?;
//! let snapshot = client.request("task/list", serde_json::json!({})).await?;
//! # let _ = snapshot;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod server;
pub mod shared;
pub mod tasks;
pub mod types;

pub use client::{BridgeClient, ClientConfig};
pub use error::{Error, Result, TransportError};
pub use server::{BridgeServer, MethodHandler, MethodRouter, ServerConfig, TaskService};
pub use shared::framing::FrameDecoder;
pub use types::{Event, Message, Request, Response, RpcError};

/// Default timeout applied to a [`BridgeClient::request`] call, in
/// milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default upper bound on a single wire frame, in bytes. A line that grows
/// past this without a newline is discarded rather than buffered without
/// bound.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
