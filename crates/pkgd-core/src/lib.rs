//! pkgd-core - shared types for the pkgd package session daemon.
//!
//! This crate holds everything the daemon and its clients must agree on:
//!
//! - [`package`]: package identifiers and their `,`-joined wire encoding
//! - [`transaction`]: staged operations, transaction members and the grouped
//!   resolution report
//! - [`progress`]: outward progress notifications and the sink capability the
//!   engine reports through
//! - [`query`]: tagged lookup results for read-only queries
//! - [`ipc`]: request/reply/signal frames carried over the daemon socket
//! - [`config`]: TOML daemon configuration

pub mod config;
pub mod ipc;
pub mod package;
pub mod progress;
pub mod query;
pub mod transaction;

pub use package::{Origin, PackageId, PackageIdError};
pub use transaction::{
    MemberAction, MemberReason, OperationKind, ReportCategory, ResolutionReport, ResolveCode,
    TransactionMember,
};

/// Daemon interface version returned by `GetVersion`.
pub const DAEMON_VERSION: u32 = 100;
