//! Service error taxonomy.
//!
//! [`DaemonError`] is the only error a [`crate::service::PackageService`]
//! call returns; the transport converts it into a wire [`Fault`] with
//! [`DaemonError::fault`].

use pkgd_core::ipc::{Fault, FaultCode};
use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced to callers of the service.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The authorization collaborator refused the caller, or could not be
    /// reached.
    #[error("access denied for {caller}: {reason}")]
    AccessDenied {
        /// Caller name.
        caller: String,
        /// Refusal or failure reason.
        reason: String,
    },

    /// The call carried no usable caller identity.
    #[error("caller identity is missing")]
    InvalidCaller,

    /// The caller does not hold the session lock.
    #[error("{}", locked_message(.holder.as_deref()))]
    Locked {
        /// Current holder, `None` when the session is unlocked.
        holder: Option<String>,
    },

    /// Another process holds the engine-level lock.
    #[error("package engine is locked: {0}")]
    EngineLocked(String),

    /// A target matched nothing.
    #[error("no package matched: {target}")]
    UnknownTarget {
        /// The offending pattern or id.
        target: String,
    },

    /// Commit failed.
    #[error("transaction failed")]
    TransactionFailed {
        /// Engine messages, in engine order.
        messages: Vec<String>,
    },

    /// The call exceeded its deadline. The work itself may still complete.
    #[error("call exceeded its {seconds}s deadline")]
    Timeout {
        /// Deadline that elapsed.
        seconds: u64,
    },

    /// Malformed arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unexpected engine or runtime failure.
    #[error("internal error: {0}")]
    Internal(String),
}

fn locked_message(holder: Option<&str>) -> String {
    holder.map_or_else(
        || "the session is not locked by this caller".to_string(),
        |holder| format!("the session is locked by {holder}"),
    )
}

impl DaemonError {
    /// Returns the wire fault code for this error.
    #[must_use]
    pub const fn code(&self) -> FaultCode {
        match self {
            Self::AccessDenied { .. } => FaultCode::AccessDenied,
            Self::InvalidCaller => FaultCode::InvalidCaller,
            Self::Locked { .. } => FaultCode::Locked,
            Self::EngineLocked(_) => FaultCode::EngineLocked,
            Self::UnknownTarget { .. } => FaultCode::UnknownTarget,
            Self::TransactionFailed { .. } => FaultCode::TransactionFailed,
            Self::Timeout { .. } => FaultCode::Timeout,
            Self::InvalidRequest(_) => FaultCode::InvalidRequest,
            Self::Internal(_) => FaultCode::InternalError,
        }
    }

    /// Converts the error into a wire fault.
    #[must_use]
    pub fn fault(&self) -> Fault {
        let mut fault = Fault::new(self.code(), self.to_string());
        if let Self::TransactionFailed { messages } = self {
            fault.details.clone_from(messages);
        }
        fault
    }
}

impl From<EngineError> for DaemonError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Locked(reason) => Self::EngineLocked(reason),
            EngineError::NoMatch(target) => Self::UnknownTarget { target },
            EngineError::InvalidPackage(reason) => Self::InvalidRequest(reason),
            EngineError::Transaction(messages) => Self::TransactionFailed { messages },
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type for service operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
