//! Socket client for the pkgd daemon.
//!
//! Requests carry an increasing `id`; the daemon answers each with exactly
//! one reply or fault frame carrying the same id. Once the connection has
//! subscribed, progress signals arrive interleaved with replies. Signals that
//! arrive while a call is outstanding are either handed to a callback
//! ([`PkgdClient::call_with_progress`]) or buffered for
//! [`PkgdClient::next_signal`].
//!
//! # Timeouts
//!
//! Connecting and sending are bounded by the client timeout. Waiting for a
//! reply is bounded by the daemon's own deadline for that kind of call plus a
//! grace period, so a stuck daemon call is reported by the daemon as a
//! `timeout` fault before the client gives up on its own.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pkgd_core::config::TimeoutSection;
use pkgd_core::ipc::{
    Call, Fault, FrameError, MAX_FRAME_SIZE, Reply, Request, ServerFrame, decode_frame,
    encode_frame,
};
use pkgd_core::progress::Notification;
use pkgd_core::query::Lookup;
use pkgd_core::{OperationKind, ResolutionReport};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio::time::Instant;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

/// Default connect and send timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Extra time granted on top of the daemon's deadline when waiting for a
/// reply.
pub const REPLY_GRACE_SECS: u64 = 30;

// ============================================================================
// Error Types
// ============================================================================

/// Error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The socket does not exist or refuses connections.
    #[error("daemon is not running")]
    DaemonNotRunning,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// A frame could not be encoded or decoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The daemon answered with a fault.
    #[error("daemon fault: {0}")]
    Fault(Fault),

    /// The operation did not finish in time.
    #[error("operation timed out")]
    Timeout,

    /// The daemon closed the connection.
    #[error("connection closed by daemon")]
    ConnectionClosed,

    /// The reply does not have the shape the call expects.
    #[error("unexpected reply to {method}: {detail}")]
    UnexpectedReply {
        /// Method that was called.
        method: &'static str,
        /// What arrived instead.
        detail: String,
    },
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound || err.kind() == io::ErrorKind::ConnectionRefused {
            Self::DaemonNotRunning
        } else {
            Self::Io(err)
        }
    }
}

impl ClientError {
    fn unexpected(method: &'static str, reply: &Reply) -> Self {
        Self::UnexpectedReply {
            method,
            detail: format!("{reply:?}"),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// One connection to the daemon.
///
/// The daemon knows the caller by its connection, so a session lock taken
/// through one client is only usable through that same client.
pub struct PkgdClient {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
    next_id: u64,
    timeout: Duration,
    call_deadline: Duration,
    run_deadline: Duration,
    signals: VecDeque<Notification>,
}

impl PkgdClient {
    /// Connects to the daemon socket with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DaemonNotRunning`] when the socket does not
    /// exist or nobody listens on it.
    pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        Self::connect_with_timeout(socket_path, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Connects with a custom connect and send timeout.
    pub async fn connect_with_timeout(
        socket_path: &Path,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        // Check if socket exists first (provides better error message)
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }

        let stream = tokio::time::timeout(timeout, UnixStream::connect(socket_path))
            .await
            .map_err(|_| ClientError::Timeout)??;

        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();
        let deadlines = TimeoutSection::default();

        Ok(Self {
            framed: Framed::new(stream, codec),
            next_id: 1,
            timeout,
            call_deadline: Duration::from_secs(deadlines.call_secs + REPLY_GRACE_SECS),
            run_deadline: Duration::from_secs(deadlines.run_secs + REPLY_GRACE_SECS),
            signals: VecDeque::new(),
        })
    }

    /// Overrides how long to wait for replies to ordinary calls and to the
    /// commit.
    #[must_use]
    pub const fn with_reply_deadlines(mut self, call: Duration, run: Duration) -> Self {
        self.call_deadline = call;
        self.run_deadline = run;
        self
    }

    /// Sends `call` and waits for its reply, buffering any signals that
    /// arrive in between.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Fault`] when the daemon rejects the call.
    pub async fn call(&mut self, call: Call) -> Result<Reply, ClientError> {
        let mut received = Vec::new();
        let result = self
            .exchange(call, &mut |notification: Notification| received.push(notification))
            .await;
        self.signals.extend(received);
        result
    }

    /// Sends `call` and hands every signal that arrives before the reply to
    /// `on_signal`, after first draining signals buffered earlier.
    pub async fn call_with_progress(
        &mut self,
        call: Call,
        mut on_signal: impl FnMut(Notification),
    ) -> Result<Reply, ClientError> {
        while let Some(notification) = self.signals.pop_front() {
            on_signal(notification);
        }
        self.exchange(call, &mut on_signal).await
    }

    /// Removes and returns every buffered signal.
    #[must_use]
    pub fn take_signals(&mut self) -> Vec<Notification> {
        self.signals.drain(..).collect()
    }

    /// Returns the next signal, reading from the socket when none is
    /// buffered.
    pub async fn next_signal(&mut self) -> Result<Notification, ClientError> {
        if let Some(notification) = self.signals.pop_front() {
            return Ok(notification);
        }
        let deadline = Instant::now() + self.timeout;
        match self.receive(deadline).await? {
            ServerFrame::Signal { notification } => Ok(notification),
            ServerFrame::Reply { id, .. } | ServerFrame::Fault { id, .. } => {
                Err(ClientError::UnexpectedReply {
                    method: "Subscribe",
                    detail: format!("stray frame for request {id}"),
                })
            },
        }
    }

    async fn exchange(
        &mut self,
        call: Call,
        on_signal: &mut dyn FnMut(Notification),
    ) -> Result<Reply, ClientError> {
        let id = self.next_id;
        self.next_id += 1;
        let method = call.method();
        let deadline = Instant::now()
            + if call.is_commit() {
                self.run_deadline
            } else {
                self.call_deadline
            };

        let payload = encode_frame(&Request { id, call })?;
        tokio::time::timeout(self.timeout, self.framed.send(Bytes::from(payload)))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::Io)?;
        debug!(id, method, "Request sent");

        loop {
            match self.receive(deadline).await? {
                ServerFrame::Reply { id: reply_id, result } if reply_id == id => return Ok(result),
                // id 0 answers a request the daemon could not decode
                ServerFrame::Fault { id: fault_id, fault } if fault_id == id || fault_id == 0 => {
                    return Err(ClientError::Fault(fault));
                },
                ServerFrame::Signal { notification } => on_signal(notification),
                ServerFrame::Reply { id: stale, .. } | ServerFrame::Fault { id: stale, .. } => {
                    debug!(id = stale, method, "Discarding reply to an earlier request");
                },
            }
        }
    }

    async fn receive(&mut self, deadline: Instant) -> Result<ServerFrame, ClientError> {
        let frame = tokio::time::timeout_at(deadline, self.framed.next())
            .await
            .map_err(|_| ClientError::Timeout)?
            .ok_or(ClientError::ConnectionClosed)?
            .map_err(ClientError::Io)?;
        Ok(decode_frame(&frame)?)
    }

    // ========================================================================
    // Typed calls
    // ========================================================================

    /// Returns the daemon interface version.
    pub async fn version(&mut self) -> Result<u32, ClientError> {
        match self.call(Call::GetVersion).await? {
            Reply::Int(version) => Ok(version),
            other => Err(ClientError::unexpected("GetVersion", &other)),
        }
    }

    /// Asks the daemon to forward progress signals to this connection.
    pub async fn subscribe(&mut self) -> Result<(), ClientError> {
        self.unit(Call::Subscribe).await
    }

    /// Takes the session lock. `false` means this caller already held it.
    pub async fn lock(&mut self) -> Result<bool, ClientError> {
        self.boolean(Call::Lock).await
    }

    /// Releases the session lock. `false` means this caller did not hold it.
    pub async fn unlock(&mut self) -> Result<bool, ClientError> {
        self.boolean(Call::Unlock).await
    }

    /// Asks the daemon to exit. `false` means a commit is running.
    pub async fn exit(&mut self) -> Result<bool, ClientError> {
        self.boolean(Call::Exit).await
    }

    /// Repository ids matching `filter`.
    pub async fn repositories(&mut self, filter: &str) -> Result<Vec<String>, ClientError> {
        self.strings(Call::GetRepositories {
            filter: filter.to_string(),
        })
        .await
    }

    /// One configuration value, or every value for `*`.
    pub async fn config(&mut self, key: &str) -> Result<Lookup<serde_json::Value>, ClientError> {
        self.lookup(Call::GetConfig {
            key: key.to_string(),
        })
        .await
    }

    /// Repository details.
    pub async fn repo(&mut self, id: &str) -> Result<Lookup<serde_json::Value>, ClientError> {
        self.lookup(Call::GetRepo { id: id.to_string() }).await
    }

    /// Package ids in one narrow (`installed`, `available`, ...).
    pub async fn packages(&mut self, narrow: &str) -> Result<Vec<String>, ClientError> {
        self.strings(Call::GetPackages {
            narrow: narrow.to_string(),
        })
        .await
    }

    /// Package ids whose name matches `pattern`.
    pub async fn packages_by_name(
        &mut self,
        pattern: &str,
        newest_only: bool,
    ) -> Result<Vec<String>, ClientError> {
        self.strings(Call::GetPackagesByName {
            pattern: pattern.to_string(),
            newest_only,
        })
        .await
    }

    /// One attribute of one package.
    pub async fn attribute(
        &mut self,
        id: &str,
        attr: &str,
    ) -> Result<Lookup<serde_json::Value>, ClientError> {
        self.lookup(Call::GetAttribute {
            id: id.to_string(),
            attr: attr.to_string(),
        })
        .await
    }

    /// Stages `patterns` for `kind` and resolves.
    pub async fn stage(
        &mut self,
        kind: OperationKind,
        patterns: &str,
    ) -> Result<ResolutionReport, ClientError> {
        let patterns = patterns.to_string();
        let call = match kind {
            OperationKind::Install | OperationKind::LocalInstall => Call::Install { patterns },
            OperationKind::Remove => Call::Remove { patterns },
            OperationKind::Update => Call::Update { patterns },
            OperationKind::Reinstall => Call::Reinstall { patterns },
            OperationKind::Downgrade => Call::Downgrade { patterns },
        };
        self.report(call).await
    }

    /// Stages one package by id with an explicit action.
    pub async fn add_transaction(
        &mut self,
        id: &str,
        action: &str,
    ) -> Result<Vec<String>, ClientError> {
        self.strings(Call::AddTransaction {
            id: id.to_string(),
            action: action.to_string(),
        })
        .await
    }

    /// Drops every staged member.
    pub async fn clear_transaction(&mut self) -> Result<(), ClientError> {
        self.unit(Call::ClearTransaction).await
    }

    /// Staged members as `id,action` strings.
    pub async fn transaction(&mut self) -> Result<Vec<String>, ClientError> {
        self.strings(Call::GetTransaction).await
    }

    /// Resolves what is staged without adding anything.
    pub async fn build_transaction(&mut self) -> Result<ResolutionReport, ClientError> {
        self.report(Call::BuildTransaction).await
    }

    /// Commits the resolved transaction, reporting progress to `on_signal`.
    /// The session ends whatever the outcome.
    pub async fn run_transaction(
        &mut self,
        on_signal: impl FnMut(Notification),
    ) -> Result<(), ClientError> {
        match self.call_with_progress(Call::RunTransaction, on_signal).await? {
            Reply::Unit => Ok(()),
            other => Err(ClientError::unexpected("RunTransaction", &other)),
        }
    }

    async fn unit(&mut self, call: Call) -> Result<(), ClientError> {
        let method = call.method();
        match self.call(call).await? {
            Reply::Unit => Ok(()),
            other => Err(ClientError::unexpected(method, &other)),
        }
    }

    async fn boolean(&mut self, call: Call) -> Result<bool, ClientError> {
        let method = call.method();
        match self.call(call).await? {
            Reply::Bool(value) => Ok(value),
            other => Err(ClientError::unexpected(method, &other)),
        }
    }

    async fn strings(&mut self, call: Call) -> Result<Vec<String>, ClientError> {
        let method = call.method();
        match self.call(call).await? {
            Reply::Strings(values) => Ok(values),
            other => Err(ClientError::unexpected(method, &other)),
        }
    }

    async fn lookup(&mut self, call: Call) -> Result<Lookup<serde_json::Value>, ClientError> {
        self.json(call).await
    }

    async fn report(&mut self, call: Call) -> Result<ResolutionReport, ClientError> {
        self.json(call).await
    }

    async fn json<T: serde::de::DeserializeOwned>(&mut self, call: Call) -> Result<T, ClientError> {
        let method = call.method();
        match self.call(call).await? {
            Reply::Json(value) => {
                serde_json::from_value(value).map_err(|e| ClientError::UnexpectedReply {
                    method,
                    detail: e.to_string(),
                })
            },
            other => Err(ClientError::unexpected(method, &other)),
        }
    }
}

impl std::fmt::Debug for PkgdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkgdClient")
            .field("next_id", &self.next_id)
            .field("timeout", &self.timeout)
            .field("buffered_signals", &self.signals.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_socket_is_daemon_not_running() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(PkgdClient::connect(Path::new("/nonexistent/pkgd.sock")))
            .unwrap_err();
        assert!(matches!(err, ClientError::DaemonNotRunning));
    }

    #[test]
    fn test_refused_connection_maps_to_not_running() {
        let err = ClientError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(matches!(err, ClientError::DaemonNotRunning));

        let err = ClientError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[test]
    fn test_fault_display_carries_code() {
        let err = ClientError::Fault(Fault::new(
            pkgd_core::ipc::FaultCode::Locked,
            "session is held by :1.3",
        ));
        assert_eq!(err.to_string(), "daemon fault: locked: session is held by :1.3");
    }
}
