//! Error types for the bridge.
//!
//! All failures are converted to typed values at the boundary that detects
//! them: transport problems become [`TransportError`], peer-reported failures
//! become [`Error::Rpc`], and everything maps onto a wire error code via
//! [`Error::error_code`]. Nothing here ever panics the process.

use std::path::PathBuf;

use serde_json::Value;

use crate::tasks::TaskError;
use crate::types::RpcError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire error code for an unknown method prefix or suffix.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;

/// Wire error code for params that fail to deserialize.
pub const CODE_INVALID_PARAMS: i64 = -32602;

/// Wire error code carried by every handler-level (business) failure.
pub const CODE_HANDLER_ERROR: i64 = -1;

/// Low-level stream and framing failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listening address failed. This is the one unrecoverable
    /// startup condition; callers should abort with the diagnostic.
    #[error("failed to bind {path}: {source}")]
    Bind {
        /// The rendezvous path that could not be bound.
        path: PathBuf,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// The peer closed the stream (or it was closed locally).
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be serialized or did not match any message shape.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Any other I/O failure on an established stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the bridge API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The client is in degraded mode: no backend connection is established,
    /// so the call fails fast instead of hanging.
    #[error("not connected to backend")]
    NotConnected,

    /// No response arrived within the deadline. A response that straggles in
    /// later is dropped, never delivered.
    #[error("request {method} timed out after {timeout_ms}ms")]
    Timeout {
        /// Method of the request that timed out.
        method: String,
        /// The deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Unknown method prefix, or unknown operation within a known prefix.
    /// Distinguishable on the wire (code -32601) from handler failures so
    /// that callers can treat "not implemented" differently from "failed
    /// while running".
    #[error("method not found: {method}")]
    MethodNotFound {
        /// The full method name that failed to route.
        method: String,
    },

    /// Request params did not deserialize into the operation's parameter
    /// record.
    #[error("invalid params for {method}: {message}")]
    InvalidParams {
        /// The method whose params were rejected.
        method: String,
        /// What was wrong with them.
        message: String,
    },

    /// A failure raised while executing a matched method.
    #[error("{message}")]
    Handler {
        /// Human-readable failure description.
        message: String,
    },

    /// An error carried back in a peer's response.
    #[error("{message}")]
    Rpc {
        /// Wire error code reported by the peer.
        code: i64,
        /// Error message reported by the peer.
        message: String,
        /// Optional structured detail.
        data: Option<Value>,
    },

    /// Task subsystem failure (unknown task ID, invalid transition).
    #[error(transparent)]
    Task(#[from] TaskError),

    /// JSON (de)serialization failure outside the framing layer.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `start` was called on a server that is already running.
    #[error("server is already running")]
    AlreadyRunning,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(TransportError::Io(err))
    }
}

impl Error {
    /// Shorthand for a routing failure.
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Shorthand for a params-deserialization failure.
    pub fn invalid_params(method: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidParams {
            method: method.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a handler-level failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Maps this error onto the wire error code it travels as.
    ///
    /// Routing failures keep their own codes; every other failure raised
    /// while executing a matched method is a handler failure and travels as
    /// code -1.
    pub fn error_code(&self) -> i64 {
        match self {
            Self::MethodNotFound { .. } => CODE_METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => CODE_INVALID_PARAMS,
            Self::Rpc { code, .. } => *code,
            _ => CODE_HANDLER_ERROR,
        }
    }

    /// Converts this error into the wire shape carried inside a response.
    pub fn to_rpc_error(&self) -> RpcError {
        RpcError {
            code: self.error_code(),
            message: self.to_string(),
            data: match self {
                Self::Rpc { data, .. } => data.clone(),
                _ => None,
            },
        }
    }

    /// Reconstructs an error from the wire shape carried in a response.
    pub fn from_rpc_error(err: RpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_errors_keep_their_codes() {
        assert_eq!(
            Error::method_not_found("bogus/thing").error_code(),
            CODE_METHOD_NOT_FOUND
        );
        assert_eq!(
            Error::invalid_params("task/get", "missing taskId").error_code(),
            CODE_INVALID_PARAMS
        );
    }

    #[test]
    fn handler_failures_travel_as_minus_one() {
        assert_eq!(Error::handler("boom").error_code(), CODE_HANDLER_ERROR);
        assert_eq!(Error::NotConnected.error_code(), CODE_HANDLER_ERROR);
        assert_eq!(
            Error::Task(TaskError::NotFound {
                task_id: "task_1_0".into()
            })
            .error_code(),
            CODE_HANDLER_ERROR
        );
    }

    #[test]
    fn rpc_round_trip_preserves_code_and_data() {
        let err = Error::handler("compile failed");
        let wire = err.to_rpc_error();
        assert_eq!(wire.code, -1);
        assert_eq!(wire.message, "compile failed");

        let back = Error::from_rpc_error(wire);
        assert_eq!(back.error_code(), -1);
        assert_eq!(back.to_string(), "compile failed");
    }

    #[test]
    fn display_includes_context() {
        let err = Error::Timeout {
            method: "board/list".into(),
            timeout_ms: 30_000,
        };
        assert!(err.to_string().contains("board/list"));
        assert!(err.to_string().contains("30000ms"));

        let err = Error::method_not_found("nope/nothing");
        assert!(err.to_string().contains("nope/nothing"));
    }
}
