//! The calling-side half of the bridge: a correlating request client.
//!
//! [`BridgeClient`] issues requests tagged with unique IDs, holds a
//! pending-request table, and resolves each caller with exactly the response
//! whose ID matches — regardless of arrival order. A request that sees no
//! response within its deadline fails with a timeout, and its table entry is
//! removed so a straggling response is looked up, not found, and dropped.
//!
//! The client is constructed disconnected and works in a degraded mode
//! until [`BridgeClient::connect`] succeeds: every request fails fast with
//! [`Error::NotConnected`] instead of hanging. On connection loss all
//! in-flight requests fail with a connection-closed error and the client
//! returns to degraded mode; calling `connect` again establishes a fresh
//! stream with a fresh frame decoder.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result, TransportError};
use crate::shared::framing::{self, FrameDecoder};
use crate::shared::net;
use crate::types::{Event, Message, Request};
use crate::DEFAULT_REQUEST_TIMEOUT_MS;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Callback invoked for every event the backend broadcasts to this
/// connection.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Tunables for the correlation client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline applied by [`BridgeClient::request`]; per-call overrides go
    /// through [`BridgeClient::request_with_timeout`].
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Sets the default request deadline.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

type PendingSender = oneshot::Sender<Result<Value>>;

struct ClientInner {
    config: ClientConfig,
    next_id: AtomicU64,
    connected: AtomicBool,
    pending: parking_lot::Mutex<HashMap<String, PendingSender>>,
    writer: tokio::sync::Mutex<Option<net::WriteHalf>>,
    event_handler: parking_lot::RwLock<Option<EventCallback>>,
}

/// Correlating client over one bridge connection.
///
/// Cheaply cloneable; clones share the connection and pending table.
///
/// # Examples
///
/// ```rust,no_run
/// use toolbridge::{BridgeClient, ClientConfig};
///
/// # async fn example() -> toolbridge::Result<()> {
/// let client = BridgeClient::new(ClientConfig::default());
/// client.connect("/run/bridge.sock").await?;
/// let boards = client.request("board/list", serde_json::json!({})).await?;
/// # let _ = boards;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

impl BridgeClient {
    /// Creates a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                next_id: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                pending: parking_lot::Mutex::new(HashMap::new()),
                writer: tokio::sync::Mutex::new(None),
                event_handler: parking_lot::RwLock::new(None),
            }),
        }
    }

    /// Establishes the stream and spawns the reader. A no-op when already
    /// connected.
    pub async fn connect(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let stream = net::BridgeStream::connect(path.as_ref())
            .await
            .map_err(TransportError::Io)?;
        let (read, write) = stream.into_split();

        *self.inner.writer.lock().await = Some(write);
        self.inner.connected.store(true, Ordering::SeqCst);
        debug!(path = %path.as_ref().display(), "connected to bridge");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(read_loop(inner, read));
        Ok(())
    }

    /// Returns `true` while a stream is established.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Registers the handler invoked for broadcast events. Replaces any
    /// previous handler; events arriving with no handler registered are
    /// logged and dropped.
    pub fn on_event(&self, handler: EventCallback) {
        *self.inner.event_handler.write() = Some(handler);
    }

    /// Sends `method` with `params` and suspends until the matching
    /// response arrives or the default deadline elapses.
    ///
    /// `params` must be a JSON object or `null` (treated as empty).
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.request_with_timeout(method, params, self.inner.config.request_timeout)
            .await
    }

    /// [`request`](Self::request) with a per-call deadline.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::invalid_params(
                    method,
                    format!("params must be an object, got {other}"),
                ))
            },
        };

        let id = format!("req_{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);

        let frame = framing::encode(&Message::Request(Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        }))?;

        if let Err(e) = self.write_frame(&frame).await {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // The reader dropped our sender: connection lost mid-flight.
            Ok(Err(_)) => Err(TransportError::ConnectionClosed.into()),
            Err(_) => {
                // Remove the stale entry so a straggling response finds
                // nothing and is dropped; removal here and removal on
                // response arrival are mutually exclusive under the lock.
                self.inner.pending.lock().remove(&id);
                debug!(id = %id, method = %method, "request timed out");
                Err(Error::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            },
        }
    }

    /// Closes the connection, failing all in-flight requests. The client
    /// returns to degraded mode and may `connect` again.
    pub async fn close(&self) {
        disconnect(&self.inner).await;
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let Some(write) = guard.as_mut() else {
            return Err(Error::NotConnected);
        };
        if let Err(e) = write.write_all(frame).await {
            drop(guard);
            disconnect(&self.inner).await;
            return Err(TransportError::Io(e).into());
        }
        Ok(())
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut read: net::ReadHalf) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    loop {
        match read.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for message in decoder.extend(&chunk[..n]) {
                    dispatch(&inner, message);
                }
            },
            Err(e) => {
                debug!(error = %e, "read failed");
                break;
            },
        }
    }

    disconnect(&inner).await;
}

fn dispatch(inner: &Arc<ClientInner>, message: Message) {
    match message {
        Message::Response(response) => {
            let Some(tx) = inner.pending.lock().remove(&response.id) else {
                warn!(id = %response.id, "dropping response for unknown or timed-out request");
                return;
            };
            let outcome = match (response.result, response.error) {
                (_, Some(error)) => Err(Error::from_rpc_error(error)),
                (Some(result), None) => Ok(result),
                (None, None) => Err(TransportError::InvalidMessage(
                    "response carries neither result nor error".to_string(),
                )
                .into()),
            };
            // The caller may have timed out and dropped its receiver.
            let _ = tx.send(outcome);
        },
        Message::Event(event) => {
            let handler = inner.event_handler.read().clone();
            match handler {
                Some(handler) => handler(event),
                None => debug!(event = %event.event, "unhandled event"),
            }
        },
        Message::Request(request) => {
            warn!(method = %request.method, "dropping unexpected request from backend");
        },
    }
}

/// Tears the connection down: flips to degraded mode, drops the writer, and
/// fails every pending request with a connection-closed error.
async fn disconnect(inner: &Arc<ClientInner>) {
    if !inner.connected.swap(false, Ordering::SeqCst) {
        return;
    }
    *inner.writer.lock().await = None;

    let drained: Vec<(String, PendingSender)> = inner.pending.lock().drain().collect();
    for (id, tx) in drained {
        debug!(id = %id, "failing in-flight request on disconnect");
        let _ = tx.send(Err(TransportError::ConnectionClosed.into()));
    }
    debug!("disconnected from bridge");
}
