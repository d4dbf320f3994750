//! pkgd-daemon - privileged package session daemon library
//!
//! The daemon serves package queries and transactions to local callers over
//! a Unix socket. One caller at a time holds the package session; the engine
//! behind it is opened on lock and closed again on every way out of the
//! session.
//!
//! # Runtime Requirements
//!
//! Engine work runs on tokio's blocking pool while the reactor keeps serving
//! other connections and the watchdog, so the service expects a
//! multi-threaded runtime. Tests use the default `#[tokio::test]` runtime,
//! which is enough because blocking work never runs on the reactor thread.
//!
//! # Modules
//!
//! - [`auth`]: caller identity and the cached authorization gate
//! - [`engine`]: the package engine seam, its lifecycle and the file-backed
//!   catalog engine
//! - [`error`]: the fault taxonomy returned to callers
//! - [`progress`]: broadcast of engine progress to subscribed connections
//! - [`server`]: socket binding, accept loop and per-connection framing
//! - [`service`]: the method table and the privileged call path
//! - [`session`]: the exclusive session lock
//! - [`state`]: the process-wide shutdown signal
//! - [`transaction`]: staging and resolution into grouped reports
//! - [`watchdog`]: idle and abandoned-session termination

pub mod auth;
pub mod engine;
pub mod error;
pub mod progress;
pub mod server;
pub mod service;
pub mod session;
pub mod state;
pub mod transaction;
pub mod watchdog;

pub use auth::{AuthorizationAuthority, AuthorizationGate, CallerIdentity, PeerCredentials};
pub use error::{DaemonError, DaemonResult};
pub use service::{PackageService, ServiceTimeouts};
pub use state::ShutdownSignal;
