//! Socket protocol between `pkgd` clients and the daemon.
//!
//! Frames are a 4-byte big-endian length prefix followed by a JSON payload
//! (the length-delimited codec of `tokio-util` with its default header).
//! A client sends [`Request`] frames; the daemon answers each with exactly
//! one [`ServerFrame::Reply`] or [`ServerFrame::Fault`] carrying the same
//! `id`, and, once the client has sent [`Call::Subscribe`], interleaves
//! [`ServerFrame::Signal`] frames.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::progress::Notification;

/// Maximum frame size in bytes (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/pkgd/pkgd.sock";

/// A method call. The caller identity is supplied by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    /// Daemon interface version. No authorization.
    GetVersion,
    /// Acquire the session lock.
    Lock,
    /// Release the session lock.
    Unlock,
    /// Ask the daemon to exit.
    Exit,
    /// Start receiving notifications on this connection.
    Subscribe,
    /// Repository ids, `""`/`enabled` or a glob over ids.
    GetRepositories {
        /// Filter.
        #[serde(default)]
        filter: String,
    },
    /// A configuration value, `*` for all.
    GetConfig {
        /// Setting name.
        key: String,
    },
    /// Repository settings.
    GetRepo {
        /// Repository id.
        id: String,
    },
    /// Package ids for a narrower.
    GetPackages {
        /// Narrower name (`installed`, `updates`, ...).
        narrow: String,
    },
    /// Package ids matching a name pattern.
    GetPackagesByName {
        /// Name pattern.
        pattern: String,
        /// Only the newest version per name.
        #[serde(default)]
        newest_only: bool,
    },
    /// One attribute of a package.
    GetAttribute {
        /// Encoded package id.
        id: String,
        /// Attribute name.
        attr: String,
    },
    /// Stage installs, then build.
    Install {
        /// Space separated patterns.
        patterns: String,
    },
    /// Stage removals, then build.
    Remove {
        /// Space separated patterns.
        patterns: String,
    },
    /// Stage updates (all when empty), then build.
    Update {
        /// Space separated patterns.
        #[serde(default)]
        patterns: String,
    },
    /// Stage reinstalls, then build.
    Reinstall {
        /// Space separated patterns.
        patterns: String,
    },
    /// Stage downgrades, then build.
    Downgrade {
        /// Space separated patterns.
        patterns: String,
    },
    /// Stage one package by id and action.
    AddTransaction {
        /// Encoded package id, or a file path for `localinstall`.
        id: String,
        /// Action name.
        action: String,
    },
    /// Drop the pending transaction.
    ClearTransaction,
    /// Pending members as `"<id>,<action>"` strings.
    GetTransaction,
    /// Resolve the pending transaction.
    BuildTransaction,
    /// Commit the pending transaction.
    RunTransaction,
}

impl Call {
    /// Method name used in logs.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::GetVersion => "GetVersion",
            Self::Lock => "Lock",
            Self::Unlock => "Unlock",
            Self::Exit => "Exit",
            Self::Subscribe => "Subscribe",
            Self::GetRepositories { .. } => "GetRepositories",
            Self::GetConfig { .. } => "GetConfig",
            Self::GetRepo { .. } => "GetRepo",
            Self::GetPackages { .. } => "GetPackages",
            Self::GetPackagesByName { .. } => "GetPackagesByName",
            Self::GetAttribute { .. } => "GetAttribute",
            Self::Install { .. } => "Install",
            Self::Remove { .. } => "Remove",
            Self::Update { .. } => "Update",
            Self::Reinstall { .. } => "Reinstall",
            Self::Downgrade { .. } => "Downgrade",
            Self::AddTransaction { .. } => "AddTransaction",
            Self::ClearTransaction => "ClearTransaction",
            Self::GetTransaction => "GetTransaction",
            Self::BuildTransaction => "BuildTransaction",
            Self::RunTransaction => "RunTransaction",
        }
    }

    /// Returns `true` for the commit call, which gets the long timeout.
    #[must_use]
    pub const fn is_commit(&self) -> bool {
        matches!(self, Self::RunTransaction)
    }
}

/// Client to daemon frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Client-chosen correlation id.
    pub id: u64,
    /// The call.
    pub call: Call,
}

/// Successful result of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reply {
    /// No value.
    Unit,
    /// Boolean result.
    Bool(bool),
    /// Integer result.
    Int(u32),
    /// String list result.
    Strings(Vec<String>),
    /// JSON document result.
    Json(serde_json::Value),
}

/// Named fault conditions surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// The authorization collaborator refused the caller.
    AccessDenied,
    /// The session lock is held by another caller, or the caller has none.
    Locked,
    /// A process outside the daemon holds the engine lock.
    EngineLocked,
    /// A target matched nothing.
    UnknownTarget,
    /// Resolution or commit failed.
    TransactionFailed,
    /// The call exceeded its deadline.
    Timeout,
    /// The caller identity is missing.
    InvalidCaller,
    /// Malformed arguments.
    InvalidRequest,
    /// Unexpected daemon failure.
    InternalError,
}

impl FaultCode {
    /// Returns the wire name of the fault.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::Locked => "locked",
            Self::EngineLocked => "engine_locked",
            Self::UnknownTarget => "unknown_target",
            Self::TransactionFailed => "transaction_failed",
            Self::Timeout => "timeout",
            Self::InvalidCaller => "invalid_caller",
            Self::InvalidRequest => "invalid_request",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault returned instead of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct Fault {
    /// Fault condition.
    pub code: FaultCode,
    /// Human-readable detail.
    pub message: String,
    /// Engine messages, for `transaction_failed`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl Fault {
    /// Creates a fault without details.
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }
}

/// Daemon to client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Successful answer to request `id`.
    Reply {
        /// Request id.
        id: u64,
        /// Result.
        result: Reply,
    },
    /// Failed answer to request `id`.
    Fault {
        /// Request id.
        id: u64,
        /// The fault.
        fault: Fault,
    },
    /// Unsolicited notification.
    Signal {
        /// Notification payload.
        #[serde(flatten)]
        notification: Notification,
    },
}

/// Frame payload errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Payload is not valid JSON for the expected frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Payload exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    TooLarge {
        /// Actual size.
        size: usize,
        /// Maximum size.
        max: usize,
    },
}

/// Serializes a frame payload.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(frame)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(payload)
}

/// Parses a frame payload.
pub fn decode_frame<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_slice(payload)?)
}
