//! The three message shapes carried on the wire.
//!
//! Every frame is exactly one of:
//!
//! - a [`Request`] — caller-assigned `id`, flat `method` name, object params;
//! - a [`Response`] — echoes the request `id`, carries exactly one of
//!   `result` or `error`;
//! - an [`Event`] — unsolicited, no `id`, multicast to every connection.
//!
//! Classification is by field presence, not by a type tag: a `method` field
//! marks a request, `result`/`error` mark a response, and `event` marks an
//! event. Anything else is an invalid message and is dropped by the framing
//! layer without aborting the stream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;

/// A correlated request. `id` is opaque to the receiver and must be unique
/// among the sender's outstanding requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Caller-assigned correlation ID.
    pub id: String,
    /// Flat method name, `domain/operation`.
    pub method: String,
    /// Operation parameters. Absent on the wire means empty.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// The error half of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code; see the constants in [`crate::error`].
    pub code: i64,
    /// Human-readable failure description.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A reply to exactly one request, correlated by `id`. Exactly one of
/// `result`/`error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Echo of the originating request's ID.
    pub id: String,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Builds a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Builds a failure response.
    pub fn failure(id: impl Into<String>, error: RpcError) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }
}

/// An unsolicited, multicast notification. No reply is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event name, `domain/kind` by convention (e.g. `task/progress`).
    pub event: String,
    /// Event payload.
    pub data: Value,
}

impl Event {
    /// Builds an event.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// One decoded wire frame.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A correlated request.
    Request(Request),
    /// A reply to a request.
    Response(Response),
    /// An unsolicited notification.
    Event(Event),
}

impl Message {
    /// Classifies and deserializes one JSON document.
    pub fn from_value(value: Value) -> Result<Self, TransportError> {
        if value.get("method").is_some() {
            let request: Request = serde_json::from_value(value)
                .map_err(|e| TransportError::InvalidMessage(format!("invalid request: {e}")))?;
            Ok(Self::Request(request))
        } else if value.get("result").is_some() || value.get("error").is_some() {
            let response: Response = serde_json::from_value(value)
                .map_err(|e| TransportError::InvalidMessage(format!("invalid response: {e}")))?;
            Ok(Self::Response(response))
        } else if value.get("event").is_some() {
            let event: Event = serde_json::from_value(value)
                .map_err(|e| TransportError::InvalidMessage(format!("invalid event: {e}")))?;
            Ok(Self::Event(event))
        } else {
            Err(TransportError::InvalidMessage(
                "unknown message type".to_string(),
            ))
        }
    }

    /// Parses one complete line (without its newline delimiter).
    pub fn parse(line: &str) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| TransportError::InvalidMessage(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }
}
