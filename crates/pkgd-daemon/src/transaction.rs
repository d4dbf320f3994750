//! Transaction building on top of the session's engine.
//!
//! [`TransactionBuilder`] turns caller patterns into staged members, runs
//! the engine's solve step between `start-build` and `end-build`
//! notifications, and folds the outcome into a [`ResolutionReport`].

use pkgd_core::progress::TransactionPhase;
use pkgd_core::{OperationKind, PackageId, ResolutionReport, ResolveCode, TransactionMember};
use tracing::{debug, warn};

use crate::engine::{EngineError, PackageEngine, PackageRecord};
use crate::error::{DaemonError, DaemonResult};
use crate::progress::ProgressReporter;

/// What staging a pattern list produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingOutcome {
    /// Members added to the pending set.
    pub staged: Vec<TransactionMember>,
    /// Targets that matched nothing.
    pub unknown_targets: Vec<String>,
    /// Other per-target failures.
    pub messages: Vec<String>,
}

/// Stages and resolves against one engine.
pub struct TransactionBuilder<'a> {
    engine: &'a mut dyn PackageEngine,
    reporter: &'a ProgressReporter,
}

impl<'a> TransactionBuilder<'a> {
    /// Creates a builder over the session's engine.
    pub fn new(engine: &'a mut dyn PackageEngine, reporter: &'a ProgressReporter) -> Self {
        Self { engine, reporter }
    }

    /// Stages every space separated target of `patterns`.
    ///
    /// Targets are independent: a failing one is recorded and the rest are
    /// still staged. An empty update stages all available updates.
    pub fn stage_patterns(&mut self, kind: OperationKind, patterns: &str) -> StagingOutcome {
        let mut outcome = StagingOutcome::default();
        let targets: Vec<&str> = patterns.split(' ').filter(|t| !t.is_empty()).collect();

        if targets.is_empty() && kind == OperationKind::Update {
            match self.engine.stage_all_updates() {
                Ok(staged) => outcome.staged = staged,
                Err(e) => outcome.messages.push(e.to_string()),
            }
            return outcome;
        }

        for pattern in targets {
            match self.engine.stage(kind, pattern) {
                Ok(staged) => {
                    debug!(%kind, pattern, staged = staged.len(), "Target staged");
                    outcome.staged.extend(staged);
                },
                Err(EngineError::NoMatch(_)) => {
                    warn!(%kind, pattern, "No package matched");
                    outcome.unknown_targets.push(pattern.to_string());
                },
                Err(e) => {
                    warn!(%kind, pattern, error = %e, "Failed to stage target");
                    outcome.messages.push(format!("{pattern}: {e}"));
                },
            }
        }
        outcome
    }

    /// Stages patterns, then resolves the whole pending set.
    pub fn build(&mut self, kind: OperationKind, patterns: &str) -> ResolutionReport {
        let outcome = self.stage_patterns(kind, patterns);
        let mut report = self.resolve();
        report.unknown_targets = outcome.unknown_targets;
        if !outcome.messages.is_empty() {
            report.messages.splice(0..0, outcome.messages);
        }
        report
    }

    /// Stages one package by id and action name. `localinstall` takes a
    /// file path instead of an id. Returns the encodings of the members
    /// added.
    pub fn add_member(&mut self, id: &str, action: &str) -> DaemonResult<Vec<String>> {
        let kind = OperationKind::from_action(action)
            .ok_or_else(|| DaemonError::InvalidRequest(format!("unknown action: {action}")))?;

        let staged = if kind == OperationKind::LocalInstall {
            self.engine.stage(kind, id)?
        } else {
            let package: PackageId = id
                .parse()
                .map_err(|e| DaemonError::InvalidRequest(format!("bad package id {id:?}: {e}")))?;
            self.engine.stage_package(kind, &package)?
        };
        Ok(staged.iter().map(TransactionMember::encode).collect())
    }

    /// Resolves the pending set. Always brackets the engine call with
    /// `start-build` and `end-build`.
    pub fn resolve(&mut self) -> ResolutionReport {
        self.reporter.emit(TransactionPhase::StartBuild);
        let resolution = self.engine.resolve();
        let report = match resolution.code {
            ResolveCode::Ok => ResolutionReport::from_members(
                &resolution.members,
                &resolution.skipped,
                resolution.messages,
            ),
            code => ResolutionReport::failed(code, resolution.messages),
        };
        self.reporter.emit(TransactionPhase::EndBuild);
        debug!(code = ?report.code, groups = report.groups.len(), "Transaction built");
        report
    }

    /// Pending members as `"<id>,<action>"`.
    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        self.engine
            .pending()
            .iter()
            .map(TransactionMember::encode)
            .collect()
    }

    /// Drops the pending set.
    pub fn clear(&mut self) {
        self.engine.clear();
    }
}

/// Sorted, de-duplicated id strings for a package listing, reporting the
/// installed identity for anything present in the installed set.
#[must_use]
pub fn package_id_list(engine: &dyn PackageEngine, records: Vec<PackageRecord>) -> Vec<String> {
    let mut ids: Vec<PackageId> = records
        .into_iter()
        .map(|record| engine.installed_match(&record.id).unwrap_or(record.id))
        .collect();
    ids.sort();
    ids.dedup();
    ids.iter().map(ToString::to_string).collect()
}
