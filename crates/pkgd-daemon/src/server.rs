//! Unix socket transport.
//!
//! Each accepted connection becomes one caller, named `:1.<n>` in accept
//! order, with the peer's uid/gid/pid attached for the authorization gate.
//! Requests on a connection are handled one after another; replies and,
//! after `Subscribe`, signal frames share a single writer task so progress
//! keeps flowing while a long call is in flight.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pkgd_core::ipc::{
    Call, DEFAULT_SOCKET_PATH, Fault, FaultCode, MAX_FRAME_SIZE, Request, ServerFrame,
    decode_frame, encode_frame,
};
use pkgd_core::progress::Notification;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

use crate::auth::{CallerIdentity, PeerCredentials};
use crate::service::PackageService;

/// Mode for a socket directory created by the daemon.
pub const DIRECTORY_MODE: u32 = 0o700;

/// Default socket mode: any local user may reach the authorization gate.
pub const DEFAULT_SOCKET_MODE: u32 = 0o666;

/// Default limit on concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Outbound frames buffered per connection.
const OUTBOUND_CAPACITY: usize = 256;

/// Poll interval of the accept loop's shutdown check.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// A framed daemon connection.
pub type Connection = Framed<UnixStream, LengthDelimitedCodec>;

/// Length-delimited codec with the daemon's frame limit.
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// Socket server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket path.
    pub socket_path: PathBuf,
    /// Socket file mode.
    pub socket_mode: u32,
    /// Concurrent connection limit.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_mode: DEFAULT_SOCKET_MODE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ServerConfig {
    /// Config for `socket_path` with default mode and limits.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Bound daemon socket. Removes the socket file on drop.
#[derive(Debug)]
pub struct SocketServer {
    config: ServerConfig,
    listener: UnixListener,
    connection_sem: Arc<Semaphore>,
    next_connection: AtomicU64,
}

impl SocketServer {
    /// Binds the socket.
    ///
    /// Creates the parent directory (mode 0700) when missing, replaces a
    /// stale socket file, and applies the configured mode.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created, the path exists and is not
    /// a socket, or binding fails.
    pub fn bind(config: ServerConfig) -> io::Result<Self> {
        if let Some(parent) = config.socket_path.parent() {
            ensure_directory(parent)?;
        }
        cleanup_socket(&config.socket_path)?;

        let listener = UnixListener::bind(&config.socket_path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "failed to bind socket to {}: {e}",
                    config.socket_path.display()
                ),
            )
        })?;
        set_socket_permissions(&config.socket_path, config.socket_mode)?;

        info!(
            socket_path = %config.socket_path.display(),
            mode = %format!("{:o}", config.socket_mode),
            max_connections = config.max_connections,
            "Socket bound"
        );

        Ok(Self {
            connection_sem: Arc::new(Semaphore::new(config.max_connections)),
            config,
            listener,
            next_connection: AtomicU64::new(1),
        })
    }

    /// Socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Accepts the next connection and names its caller.
    ///
    /// # Errors
    ///
    /// Fails if accepting fails.
    pub async fn accept(&self) -> io::Result<(Connection, CallerIdentity, OwnedSemaphorePermit)> {
        let permit = Arc::clone(&self.connection_sem)
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("connection semaphore closed"))?;

        let (stream, _addr) = self.listener.accept().await?;
        let credentials = peer_credentials(&stream);
        let n = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let caller = CallerIdentity::connection(n, credentials);

        Ok((Framed::new(stream, frame_codec()), caller, permit))
    }

    /// Accepts connections until the service requests shutdown.
    pub async fn serve(&self, service: Arc<PackageService>) {
        info!("Accepting connections");
        let shutdown = Arc::clone(service.shutdown_signal());

        loop {
            if shutdown.is_requested() {
                info!("Socket server shutting down");
                break;
            }

            // Accept with timeout to allow shutdown checks
            match tokio::time::timeout(ACCEPT_POLL, self.accept()).await {
                Ok(Ok((connection, caller, permit))) => {
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        let _permit = permit;
                        handle_connection(connection, caller, service).await;
                    });
                },
                Ok(Err(e)) => {
                    error!(error = %e, "Failed to accept connection");
                },
                Err(_) => {},
            }
        }
    }

    /// Removes the socket file.
    ///
    /// # Errors
    ///
    /// Fails if the file exists and cannot be removed.
    pub fn cleanup(&self) -> io::Result<()> {
        let path = &self.config.socket_path;
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("failed to remove socket {}: {e}", path.display()),
                )
            })?;
            info!(socket_path = %path.display(), "Removed socket file");
        }
        Ok(())
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to cleanup socket on drop: {e}");
        }
    }
}

fn peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    match stream.peer_cred() {
        Ok(cred) => Some(PeerCredentials {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid(),
        }),
        Err(e) => {
            warn!(error = %e, "Failed to read peer credentials");
            None
        },
    }
}

/// Creates `path` with mode 0700 when missing. Existing directories keep
/// their permissions; symlinks are refused.
fn ensure_directory(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.file_type().is_symlink() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "{} is a symlink, refusing to use as socket directory",
                        path.display()
                    ),
                ));
            }
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists but is not a directory", path.display()),
                ));
            }
            Ok(())
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            use std::os::unix::fs::PermissionsExt;

            std::fs::create_dir_all(path).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("failed to create directory {}: {e}", path.display()),
                )
            })?;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(DIRECTORY_MODE))
                .map_err(|e| {
                    io::Error::new(
                        e.kind(),
                        format!("failed to set permissions on {}: {e}", path.display()),
                    )
                })
        },
        Err(e) => Err(io::Error::new(
            e.kind(),
            format!("failed to stat {}: {e}", path.display()),
        )),
    }
}

fn set_socket_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!(
                "failed to set socket permissions on {}: {e}",
                path.display()
            ),
        )
    })
}

/// Removes a stale socket file. Anything else at `path` is an error.
fn cleanup_socket(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(io::Error::new(
                e.kind(),
                format!("failed to stat {}: {e}", path.display()),
            ));
        },
    };

    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("path {} exists but is not a socket", path.display()),
        ));
    }
    std::fs::remove_file(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to remove stale socket {}: {e}", path.display()),
        )
    })?;
    debug!(path = %path.display(), "Removed stale socket file");
    Ok(())
}

// =============================================================================
// Connection
// =============================================================================

/// Serves one connection until the peer hangs up.
///
/// Dropping the connection does not release a session the caller holds; the
/// watchdog reclaims abandoned sessions.
pub async fn handle_connection(
    connection: Connection,
    caller: CallerIdentity,
    service: Arc<PackageService>,
) {
    info!(caller = %caller, "New connection");

    let (sink, mut stream) = connection.split();
    let (tx, rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(write_frames(sink, rx, caller.clone()));
    let mut forwarder: Option<JoinHandle<()>> = None;

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(caller = %caller, error = %e, "Connection read failed");
                break;
            },
        };

        let response = match decode_frame::<Request>(&frame) {
            Ok(Request { id, call }) => {
                if call == Call::Subscribe && forwarder.is_none() {
                    let signals = service.reporter().subscribe();
                    forwarder = Some(tokio::spawn(forward_signals(
                        signals,
                        tx.clone(),
                        caller.clone(),
                    )));
                }
                match service.call(&caller, call).await {
                    Ok(result) => ServerFrame::Reply { id, result },
                    Err(e) => ServerFrame::Fault {
                        id,
                        fault: e.fault(),
                    },
                }
            },
            Err(e) => {
                warn!(caller = %caller, error = %e, "Malformed request");
                ServerFrame::Fault {
                    id: 0,
                    fault: Fault::new(FaultCode::InvalidRequest, e.to_string()),
                }
            },
        };

        if tx.send(response).await.is_err() {
            break;
        }
    }

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(tx);
    if let Err(e) = writer.await {
        warn!(caller = %caller, error = %e, "Connection writer failed");
    }
    info!(caller = %caller, "Connection closed");
}

async fn write_frames(
    mut sink: futures::stream::SplitSink<Connection, Bytes>,
    mut rx: mpsc::Receiver<ServerFrame>,
    caller: CallerIdentity,
) {
    while let Some(frame) = rx.recv().await {
        let payload = match encode_frame(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                error!(caller = %caller, error = %e, "Failed to encode frame");
                continue;
            },
        };
        if let Err(e) = sink.send(Bytes::from(payload)).await {
            debug!(caller = %caller, error = %e, "Peer went away");
            break;
        }
    }
}

async fn forward_signals(
    mut signals: broadcast::Receiver<Notification>,
    tx: mpsc::Sender<ServerFrame>,
    caller: CallerIdentity,
) {
    loop {
        match signals.recv().await {
            Ok(notification) => {
                if tx.send(ServerFrame::Signal { notification }).await.is_err() {
                    break;
                }
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(caller = %caller, skipped, "Subscriber lagged, notifications dropped");
            },
            Err(RecvError::Closed) => break,
        }
    }
}
