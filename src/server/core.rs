//! The connection server: accepts streams at the rendezvous path,
//! demultiplexes decoded messages per connection, dispatches requests to the
//! method router, writes responses back on the same connection, and fans
//! event broadcasts out to every live connection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::server::router::MethodRouter;
use crate::shared::framing::{self, FrameDecoder};
use crate::shared::net;
use crate::types::{Event, Message, Request, Response};
use crate::DEFAULT_MAX_FRAME_BYTES;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Tunables for the connection server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on a single inbound frame; longer lines are discarded.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    /// Sets the inbound frame-size bound.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }
}

/// Outbound side of one live connection: frames queued here are written by
/// the connection's writer task in order.
struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// State shared between the server handle and its spawned loops.
struct ServerShared {
    connections: DashMap<u64, ConnectionHandle>,
    next_conn_id: AtomicU64,
    running: AtomicBool,
    bound_path: parking_lot::Mutex<Option<PathBuf>>,
    shutdown: broadcast::Sender<()>,
}

/// The backend-side connection server.
///
/// One server owns one rendezvous path. `stop` always releases the bound
/// address so a subsequent `start` succeeds without manual cleanup, and is
/// safe to call when the server never started.
pub struct BridgeServer {
    config: ServerConfig,
    router: Arc<MethodRouter>,
    event_source: Option<broadcast::Sender<Event>>,
    shared: Arc<ServerShared>,
}

impl BridgeServer {
    /// Creates a server that dispatches requests through `router`.
    pub fn new(router: MethodRouter) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config: ServerConfig::default(),
            router: Arc::new(router),
            event_source: None,
            shared: Arc::new(ServerShared {
                connections: DashMap::new(),
                next_conn_id: AtomicU64::new(0),
                running: AtomicBool::new(false),
                bound_path: parking_lot::Mutex::new(None),
                shutdown,
            }),
        }
    }

    /// Replaces the default configuration.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches an event bus whose events are forwarded to every live
    /// connection. The task manager publishes its progress events here.
    pub fn with_event_source(mut self, events: broadcast::Sender<Event>) -> Self {
        self.event_source = Some(events);
        self
    }

    /// Binds the rendezvous path and starts accepting connections.
    ///
    /// A stale binding artifact left by a previous run is removed first, so
    /// restarts are idempotent. Fails with [`Error::AlreadyRunning`] on a
    /// running server, or with a bind error — the one startup condition
    /// callers should treat as fatal.
    pub async fn start(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let listener = match net::BridgeListener::bind(path) {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            },
        };
        *self.shared.bound_path.lock() = Some(path.to_path_buf());
        info!(path = %path.display(), "bridge server listening");

        let shared = Arc::clone(&self.shared);
        let router = Arc::clone(&self.router);
        let config = self.config.clone();
        let shutdown_rx = self.shared.shutdown.subscribe();
        tokio::spawn(accept_loop(shared, router, config, listener, shutdown_rx));

        if let Some(events) = &self.event_source {
            let shared = Arc::clone(&self.shared);
            let mut events_rx = events.subscribe();
            let mut shutdown_rx = self.shared.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        received = events_rx.recv() => match received {
                            Ok(event) => broadcast_event(&shared, &event),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "event forwarder lagged behind the bus");
                            },
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            });
        }

        Ok(())
    }

    /// Returns `true` while the server is accepting connections.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of currently live connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Serializes `event` once and writes it to every live connection.
    ///
    /// A failure on one connection drops that connection from the broadcast
    /// set and does not affect delivery to the others.
    pub fn broadcast(&self, event: &Event) {
        broadcast_event(&self.shared, event);
    }

    /// Stops listening, force-closes all connections, and removes the bound
    /// address artifact. Safe to call when never started or already stopped.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shared.shutdown.send(());
        self.shared.connections.clear();

        if let Some(path) = self.shared.bound_path.lock().take() {
            net::cleanup(&path);
        }
        info!("bridge server stopped");
    }
}

async fn accept_loop(
    shared: Arc<ServerShared>,
    router: Arc<MethodRouter>,
    config: ServerConfig,
    listener: net::BridgeListener,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    let conn_id = shared.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(conn_id, "accepted connection");
                    let shared = Arc::clone(&shared);
                    let router = Arc::clone(&router);
                    let config = config.clone();
                    let shutdown_rx = shared.shutdown.subscribe();
                    tokio::spawn(handle_connection(
                        shared, router, config, conn_id, stream, shutdown_rx,
                    ));
                },
                Err(e) => {
                    // Transient accept errors must not kill the server.
                    error!(error = %e, "failed to accept connection");
                },
            },
        }
    }
    debug!("accept loop stopped");
}

async fn handle_connection(
    shared: Arc<ServerShared>,
    router: Arc<MethodRouter>,
    config: ServerConfig,
    conn_id: u64,
    stream: net::BridgeStream,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut read, mut write) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    shared.connections.insert(
        conn_id,
        ConnectionHandle {
            outbound: out_tx.clone(),
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if let Err(e) = write.write_all(&bytes).await {
                debug!(conn_id, error = %e, "write failed, closing connection");
                break;
            }
        }
    });

    let mut decoder = FrameDecoder::with_max_frame_bytes(config.max_frame_bytes);
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    'conn: loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break 'conn,
            read_result = read.read(&mut chunk) => match read_result {
                Ok(0) => break 'conn,
                Ok(n) => {
                    for message in decoder.extend(&chunk[..n]) {
                        let Message::Request(request) = message else {
                            // This side only ever answers requests; anything
                            // else from the peer is noise.
                            debug!(conn_id, "ignoring non-request message");
                            continue;
                        };
                        // One request at a time per connection; other
                        // connections proceed concurrently.
                        let response = dispatch_request(&router, request).await;
                        match framing::encode(&Message::Response(response)) {
                            Ok(bytes) => {
                                if out_tx.send(bytes).is_err() {
                                    break 'conn;
                                }
                            },
                            Err(e) => error!(conn_id, error = %e, "failed to encode response"),
                        }
                    }
                },
                Err(e) => {
                    debug!(conn_id, error = %e, "read failed");
                    break 'conn;
                },
            },
        }
    }

    shared.connections.remove(&conn_id);
    drop(out_tx);
    let _ = writer.await;
    debug!(conn_id, "connection closed");
}

/// Runs one request through the router, converting every failure into an
/// error response. The connection itself is never torn down by a handler
/// error.
async fn dispatch_request(router: &MethodRouter, request: Request) -> Response {
    let Request { id, method, params } = request;
    debug!(id = %id, method = %method, "handling request");
    match router.dispatch(&method, params).await {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            debug!(id = %id, method = %method, error = %e, "request failed");
            Response::failure(id, e.to_rpc_error())
        },
    }
}

fn broadcast_event(shared: &ServerShared, event: &Event) {
    let bytes = match framing::encode(&Message::Event(event.clone())) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to encode event");
            return;
        },
    };

    let mut dead = Vec::new();
    for entry in shared.connections.iter() {
        if entry.value().outbound.send(bytes.clone()).is_err() {
            dead.push(*entry.key());
        }
    }
    for conn_id in dead {
        shared.connections.remove(&conn_id);
        debug!(conn_id, "dropped dead connection from broadcast set");
    }
}
