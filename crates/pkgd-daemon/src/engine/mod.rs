//! Package engine boundary and its per-session lifecycle.
//!
//! The daemon never resolves dependencies itself. It drives a
//! [`PackageEngine`] opened through an [`EngineFactory`] on the first
//! privileged use of a session and closed exactly once when the session
//! ends. [`EngineHandle`] closes the engine on drop, so an engine never
//! outlives the session that opened it, even when a commit unwinds.

mod catalog;
mod version;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use catalog::{CatalogEngine, CatalogFactory};
use pkgd_core::progress::ProgressSink;
use pkgd_core::query::{Lookup, PackageAttribute, PackageNarrow};
use pkgd_core::{OperationKind, PackageId, ResolveCode, TransactionMember};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
pub use version::{evr_cmp, glob_match, vercmp};

use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Errors
// =============================================================================

/// Engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another process holds the engine-level lock.
    #[error("engine lock held: {0}")]
    Locked(String),

    /// A pattern, id or path matched nothing.
    #[error("no package matched: {0}")]
    NoMatch(String),

    /// A local package file could not be read as a package.
    #[error("invalid package: {0}")]
    InvalidPackage(String),

    /// The transaction could not be resolved or applied.
    #[error("transaction error: {}", .0.join("; "))]
    Transaction(Vec<String>),

    /// The package catalog is unreadable or inconsistent.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Engine messages for a failed commit.
    #[must_use]
    pub fn into_messages(self) -> Vec<String> {
        match self {
            Self::Transaction(messages) => messages,
            other => vec![other.to_string()],
        }
    }
}

// =============================================================================
// Engine data
// =============================================================================

/// A package as the engine knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    /// Identity.
    pub id: PackageId,
    /// Size in bytes.
    pub size: u64,
    /// One-line summary.
    pub summary: String,
    /// Long description.
    pub description: String,
    /// Upstream URL.
    pub url: Option<String>,
    /// License string.
    pub license: String,
    /// Required package names.
    pub requires: Vec<String>,
    /// Obsoleted package names.
    pub obsoletes: Vec<String>,
}

impl PackageRecord {
    /// Reads one enumerated attribute.
    #[must_use]
    pub fn attribute(&self, attr: PackageAttribute) -> Lookup<serde_json::Value> {
        use serde_json::Value;

        let value = match attr {
            PackageAttribute::Summary => Value::from(self.summary.as_str()),
            PackageAttribute::Description => Value::from(self.description.as_str()),
            PackageAttribute::Size => Value::from(self.size),
            PackageAttribute::Url => match &self.url {
                Some(url) => Value::from(url.as_str()),
                None => Value::Null,
            },
            PackageAttribute::License => Value::from(self.license.as_str()),
            PackageAttribute::Requires => Value::from(self.requires.clone()),
            PackageAttribute::Obsoletes => Value::from(self.obsoletes.clone()),
            PackageAttribute::Repoid => Value::from(self.id.origin.as_str()),
        };
        Lookup::Found(value)
    }
}

/// Repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Repository id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Whether packages from this repository are offered.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Base URL.
    #[serde(default)]
    pub baseurl: Option<String>,
}

const fn default_enabled() -> bool {
    true
}

/// Result of the engine's solve step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Outcome.
    pub code: ResolveCode,
    /// Resolved members in engine order, empty unless `code` is `Ok`.
    pub members: Vec<TransactionMember>,
    /// Packages left out, with their sizes.
    pub skipped: Vec<(PackageId, u64)>,
    /// Engine diagnostics.
    pub messages: Vec<String>,
}

impl Resolution {
    /// A resolution that produced nothing but messages.
    #[must_use]
    pub const fn messages(code: ResolveCode, messages: Vec<String>) -> Self {
        Self {
            code,
            members: Vec::new(),
            skipped: Vec::new(),
            messages,
        }
    }
}

/// Options applied when opening an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Answer every engine prompt with yes.
    pub assume_yes: bool,
    /// Engine debug verbosity.
    pub debug_level: u8,
    /// Engine error verbosity.
    pub error_level: u8,
}

impl Default for EngineOptions {
    /// Non-interactive and quiet.
    fn default() -> Self {
        Self {
            assume_yes: true,
            debug_level: 0,
            error_level: 0,
        }
    }
}

// =============================================================================
// Engine traits
// =============================================================================

/// A dependency engine instance, exclusively owned by one session.
///
/// Every method is synchronous and may block; the service calls them from a
/// blocking thread.
pub trait PackageEngine: Send {
    /// All configured repositories.
    fn repositories(&self) -> Vec<RepoInfo>;

    /// Engine configuration values.
    fn config(&self) -> BTreeMap<String, serde_json::Value>;

    /// Packages selected by a narrower.
    fn packages(&self, narrow: PackageNarrow) -> Vec<PackageRecord>;

    /// Installed and available packages whose name matches `pattern`.
    fn packages_by_name(&self, pattern: &str, newest_only: bool) -> Vec<PackageRecord>;

    /// Looks up a package by exact id.
    fn find(&self, id: &PackageId) -> Option<PackageRecord>;

    /// The installed identity of the same build as `id`, if installed.
    fn installed_match(&self, id: &PackageId) -> Option<PackageId>;

    /// Stages members for a name pattern, or a file path for
    /// [`OperationKind::LocalInstall`]. Returns the members added.
    fn stage(
        &mut self,
        kind: OperationKind,
        target: &str,
    ) -> Result<Vec<TransactionMember>, EngineError>;

    /// Stages one package by exact id.
    fn stage_package(
        &mut self,
        kind: OperationKind,
        id: &PackageId,
    ) -> Result<Vec<TransactionMember>, EngineError>;

    /// Stages every available update.
    fn stage_all_updates(&mut self) -> Result<Vec<TransactionMember>, EngineError>;

    /// Staged members, in staging order.
    fn pending(&self) -> Vec<TransactionMember>;

    /// Drops every staged member.
    fn clear(&mut self);

    /// Solves the pending set. Does not change it.
    fn resolve(&mut self) -> Resolution;

    /// Applies the pending set and clears it.
    fn apply(&mut self) -> Result<(), EngineError>;

    /// Releases the engine and its engine-level lock.
    fn close(&mut self);
}

/// Opens engines.
pub trait EngineFactory: Send + Sync {
    /// Opens an engine, taking the engine-level lock. Progress is reported
    /// through `sink` for the engine's lifetime.
    fn open(
        &self,
        options: &EngineOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Box<dyn PackageEngine>, EngineError>;
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Owned engine instance; closes the engine when dropped.
pub struct EngineHandle {
    engine: Box<dyn PackageEngine>,
}

impl EngineHandle {
    /// Wraps an opened engine.
    #[must_use]
    pub fn new(engine: Box<dyn PackageEngine>) -> Self {
        Self { engine }
    }

    /// The engine.
    pub fn engine_mut(&mut self) -> &mut dyn PackageEngine {
        &mut *self.engine
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.engine.close();
        debug!("Engine unlocked");
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

/// Lazily opens the session's engine and tears it down exactly once.
pub struct EngineLifecycle {
    factory: Arc<dyn EngineFactory>,
    sink: Arc<dyn ProgressSink>,
    options: EngineOptions,
    handle: Option<EngineHandle>,
}

impl EngineLifecycle {
    /// Creates a lifecycle with no engine open.
    #[must_use]
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        sink: Arc<dyn ProgressSink>,
        options: EngineOptions,
    ) -> Self {
        Self {
            factory,
            sink,
            options,
            handle: None,
        }
    }

    /// Returns the engine, opening it on first use.
    ///
    /// Engine-level lock contention surfaces as
    /// [`DaemonError::EngineLocked`].
    pub fn ensure(&mut self) -> DaemonResult<&mut dyn PackageEngine> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => {
                let engine = self
                    .factory
                    .open(&self.options, Arc::clone(&self.sink))
                    .map_err(DaemonError::from)?;
                debug!("Engine locked");
                EngineHandle::new(engine)
            },
        };
        Ok(self.handle.insert(handle).engine_mut())
    }

    /// Returns the open engine without opening one.
    pub fn get(&mut self) -> Option<&mut dyn PackageEngine> {
        self.handle.as_mut().map(EngineHandle::engine_mut)
    }

    /// Closes the engine if one is open. Returns `false` when there was
    /// nothing to close.
    pub fn teardown(&mut self) -> bool {
        self.handle.take().is_some()
    }

    /// Returns `true` while an engine is open.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl fmt::Debug for EngineLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLifecycle")
            .field("options", &self.options)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
