//! Platform rendezvous: Unix domain sockets on POSIX, named pipes on
//! Windows, behind one seam so the rest of the crate is platform-agnostic.
//!
//! The rendezvous point is a filesystem-namespaced path (a socket path such
//! as `/run/user/1000/bridge.sock`, or a pipe name such as
//! `\\.\pipe\bridge`). Exactly one well-known address exists per running
//! backend instance. Binding removes a pre-existing stale artifact first so
//! restarts are idempotent, and [`cleanup`] releases the address on stop.

#[cfg(unix)]
pub use unix::{BridgeListener, BridgeStream, ReadHalf, WriteHalf};

#[cfg(windows)]
pub use windows::{BridgeListener, BridgeStream, ReadHalf, WriteHalf};

/// Removes the bound address artifact, if any. Safe to call when nothing is
/// bound; on Windows pipe names vanish with their last handle, so this is a
/// no-op there.
pub fn cleanup(path: &std::path::Path) {
    #[cfg(unix)]
    unix::remove_stale(path);
    #[cfg(windows)]
    let _ = path;
}

#[cfg(unix)]
mod unix {
    use std::path::Path;

    use tokio::net::{UnixListener, UnixStream};
    use tracing::warn;

    use crate::error::TransportError;

    /// Read half of an accepted or connected stream.
    pub type ReadHalf = tokio::net::unix::OwnedReadHalf;
    /// Write half of an accepted or connected stream.
    pub type WriteHalf = tokio::net::unix::OwnedWriteHalf;

    /// A bound rendezvous point accepting inbound connections.
    #[derive(Debug)]
    pub struct BridgeListener {
        listener: UnixListener,
    }

    impl BridgeListener {
        /// Binds the address, unlinking a stale socket file first so a
        /// restart after a crash succeeds without manual cleanup.
        pub fn bind(path: &Path) -> Result<Self, TransportError> {
            remove_stale(path);
            let listener = UnixListener::bind(path).map_err(|source| TransportError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Self { listener })
        }

        /// Waits for the next inbound connection.
        pub async fn accept(&self) -> std::io::Result<BridgeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(BridgeStream(stream))
        }
    }

    /// One established byte stream.
    #[derive(Debug)]
    pub struct BridgeStream(UnixStream);

    impl BridgeStream {
        /// Connects to a listening bridge at `path`.
        pub async fn connect(path: &Path) -> std::io::Result<Self> {
            Ok(Self(UnixStream::connect(path).await?))
        }

        /// Splits into independently owned read and write halves.
        pub fn into_split(self) -> (ReadHalf, WriteHalf) {
            self.0.into_split()
        }
    }

    pub(super) fn remove_stale(path: &Path) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove stale socket");
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::path::Path;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use parking_lot::Mutex;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    use crate::error::TransportError;

    /// A named-pipe server cycling through pipe instances: each accept hands
    /// out the instance a client connected to and pre-creates the next one.
    pub struct BridgeListener {
        name: String,
        next: Mutex<Option<NamedPipeServer>>,
    }

    impl BridgeListener {
        /// Creates the first pipe instance for `path` (a `\\.\pipe\...` name).
        pub fn bind(path: &Path) -> Result<Self, TransportError> {
            let name = path.to_string_lossy().into_owned();
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&name)
                .map_err(|source| TransportError::Bind {
                    path: path.to_path_buf(),
                    source,
                })?;
            Ok(Self {
                name,
                next: Mutex::new(Some(first)),
            })
        }

        /// Waits for the next inbound connection.
        pub async fn accept(&self) -> std::io::Result<BridgeStream> {
            let server = match self.next.lock().take() {
                Some(server) => server,
                None => ServerOptions::new().create(&self.name)?,
            };
            server.connect().await?;
            *self.next.lock() = Some(ServerOptions::new().create(&self.name)?);
            Ok(BridgeStream::Server(server))
        }
    }

    /// One established byte stream, from either end of the pipe.
    pub enum BridgeStream {
        /// Server-side pipe instance.
        Server(NamedPipeServer),
        /// Client-side pipe handle.
        Client(NamedPipeClient),
    }

    impl BridgeStream {
        /// Connects to a listening bridge at `path`.
        pub async fn connect(path: &Path) -> std::io::Result<Self> {
            let name = path.to_string_lossy().into_owned();
            Ok(Self::Client(ClientOptions::new().open(name)?))
        }

        /// Splits into independently owned read and write halves.
        pub fn into_split(self) -> (ReadHalf, WriteHalf) {
            match self {
                Self::Server(pipe) => {
                    let (read, write) = tokio::io::split(pipe);
                    (ReadHalf::Server(read), WriteHalf::Server(write))
                },
                Self::Client(pipe) => {
                    let (read, write) = tokio::io::split(pipe);
                    (ReadHalf::Client(read), WriteHalf::Client(write))
                },
            }
        }
    }

    /// Read half of an accepted or connected stream.
    pub enum ReadHalf {
        /// Server-side half.
        Server(tokio::io::ReadHalf<NamedPipeServer>),
        /// Client-side half.
        Client(tokio::io::ReadHalf<NamedPipeClient>),
    }

    /// Write half of an accepted or connected stream.
    pub enum WriteHalf {
        /// Server-side half.
        Server(tokio::io::WriteHalf<NamedPipeServer>),
        /// Client-side half.
        Client(tokio::io::WriteHalf<NamedPipeClient>),
    }

    impl AsyncRead for ReadHalf {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            match self.get_mut() {
                Self::Server(inner) => Pin::new(inner).poll_read(cx, buf),
                Self::Client(inner) => Pin::new(inner).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for WriteHalf {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            match self.get_mut() {
                Self::Server(inner) => Pin::new(inner).poll_write(cx, buf),
                Self::Client(inner) => Pin::new(inner).poll_write(cx, buf),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            match self.get_mut() {
                Self::Server(inner) => Pin::new(inner).poll_flush(cx),
                Self::Client(inner) => Pin::new(inner).poll_flush(cx),
            }
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            match self.get_mut() {
                Self::Server(inner) => Pin::new(inner).poll_shutdown(cx),
                Self::Client(inner) => Pin::new(inner).poll_shutdown(cx),
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bind_accept_connect_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");

        let listener = BridgeListener::bind(&path).unwrap();
        let client = BridgeStream::connect(&path).await.unwrap();
        let server_side = listener.accept().await.unwrap();

        let (_read, mut write) = client.into_split();
        let (mut read, _write) = server_side.into_split();

        write.write_all(b"ping\n").await.unwrap();
        let mut buf = vec![0u8; 5];
        read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");
    }

    #[tokio::test]
    async fn bind_removes_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");

        // First bind leaves an artifact when the listener is dropped without
        // cleanup, as after a crash.
        let listener = BridgeListener::bind(&path).unwrap();
        drop(listener);
        assert!(path.exists());

        // Second bind succeeds anyway.
        let listener = BridgeListener::bind(&path);
        assert!(listener.is_ok());
    }

    #[tokio::test]
    async fn cleanup_is_safe_when_nothing_is_bound() {
        let dir = tempfile::tempdir().unwrap();
        cleanup(&dir.path().join("never-bound.sock"));
    }
}
