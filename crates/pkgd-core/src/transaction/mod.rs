//! Transaction members and the grouped resolution report.
//!
//! The dependency engine returns a flat list of resolved members, each
//! tagged with the action taken and whether it was requested or pulled in as
//! a dependency. [`ResolutionReport::from_members`] folds that list into the
//! fixed category order clients rely on:
//!
//! ```text
//! install, update, remove, install-deps, update-deps, remove-deps, skipped
//! ```
//!
//! Empty categories are left out; present ones never change relative order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::package::{PackageId, format_bytes};

/// Kind of operation a caller stages by pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Install new packages.
    Install,
    /// Remove installed packages.
    Remove,
    /// Update installed packages.
    Update,
    /// Reinstall installed packages at the same version.
    Reinstall,
    /// Downgrade installed packages.
    Downgrade,
    /// Install a package from a local file.
    LocalInstall,
}

impl OperationKind {
    /// Returns the wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Update => "update",
            Self::Reinstall => "reinstall",
            Self::Downgrade => "downgrade",
            Self::LocalInstall => "localinstall",
        }
    }

    /// Parses the action argument of `AddTransaction`.
    ///
    /// `obsolete` is accepted as an alias of `update`.
    #[must_use]
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "install" => Some(Self::Install),
            "remove" => Some(Self::Remove),
            "update" | "obsolete" => Some(Self::Update),
            "reinstall" => Some(Self::Reinstall),
            "downgrade" => Some(Self::Downgrade),
            "localinstall" => Some(Self::LocalInstall),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action the engine recorded for a transaction member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberAction {
    /// New package installed.
    Install,
    /// Installed package replaced by a newer one.
    Update,
    /// Package replacing packages it obsoletes.
    Obsolete,
    /// Package removed.
    Remove,
    /// Package reinstalled at the same version.
    Reinstall,
    /// Package replaced by an older version.
    Downgrade,
}

impl MemberAction {
    /// Returns the wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Obsolete => "obsolete",
            Self::Remove => "remove",
            Self::Reinstall => "reinstall",
            Self::Downgrade => "downgrade",
        }
    }
}

impl fmt::Display for MemberAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a member is part of the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MemberReason {
    /// Requested by the caller.
    #[default]
    Requested,
    /// Pulled in by dependency resolution.
    Dependency,
}

/// A resolved (or staged) transaction member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMember {
    /// The package acted on.
    pub id: PackageId,
    /// Action taken.
    pub action: MemberAction,
    /// Package size in bytes.
    pub size: u64,
    /// Packages this member obsoletes.
    #[serde(default)]
    pub obsoletes: Vec<PackageId>,
    /// Requested or dependency.
    #[serde(default)]
    pub reason: MemberReason,
}

impl TransactionMember {
    /// Creates a requested member with no obsoletes.
    #[must_use]
    pub const fn requested(id: PackageId, action: MemberAction, size: u64) -> Self {
        Self {
            id,
            action,
            size,
            obsoletes: Vec::new(),
            reason: MemberReason::Requested,
        }
    }

    /// Creates a dependency member with no obsoletes.
    #[must_use]
    pub const fn dependency(id: PackageId, action: MemberAction, size: u64) -> Self {
        Self {
            id,
            action,
            size,
            obsoletes: Vec::new(),
            reason: MemberReason::Dependency,
        }
    }

    /// Boundary encoding `"<PackageId>,<action>"`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{},{}", self.id, self.action)
    }

    /// Category this member is reported under.
    #[must_use]
    pub const fn category(&self) -> ReportCategory {
        let dependency = matches!(self.reason, MemberReason::Dependency);
        match (self.action, dependency) {
            (MemberAction::Install | MemberAction::Reinstall | MemberAction::Downgrade, false) => {
                ReportCategory::Install
            },
            (MemberAction::Update | MemberAction::Obsolete, false) => ReportCategory::Update,
            (MemberAction::Remove, false) => ReportCategory::Remove,
            (MemberAction::Install | MemberAction::Reinstall | MemberAction::Downgrade, true) => {
                ReportCategory::InstallDeps
            },
            (MemberAction::Update | MemberAction::Obsolete, true) => ReportCategory::UpdateDeps,
            (MemberAction::Remove, true) => ReportCategory::RemoveDeps,
        }
    }
}

/// Outcome code of a resolve step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveCode {
    /// Resolution succeeded; members are reported.
    Ok,
    /// Nothing to resolve, or the engine needs more input.
    Needed,
    /// Resolution failed; messages explain why.
    Error,
}

/// Report categories in their fixed output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportCategory {
    /// Requested installs.
    Install,
    /// Requested updates.
    Update,
    /// Requested removals.
    Remove,
    /// Installs pulled in as dependencies.
    InstallDeps,
    /// Updates pulled in as dependencies.
    UpdateDeps,
    /// Removals pulled in as dependencies.
    RemoveDeps,
    /// Packages left out of the transaction.
    Skipped,
}

impl ReportCategory {
    /// All categories, in report order.
    pub const ORDER: [Self; 7] = [
        Self::Install,
        Self::Update,
        Self::Remove,
        Self::InstallDeps,
        Self::UpdateDeps,
        Self::RemoveDeps,
        Self::Skipped,
    ];

    /// Returns the wire name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::InstallDeps => "install-deps",
            Self::UpdateDeps => "update-deps",
            Self::RemoveDeps => "remove-deps",
            Self::Skipped => "skipped",
        }
    }
}

/// One line of a grouped report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Package id.
    pub id: PackageId,
    /// Size in bytes.
    pub size: u64,
    /// Size as printed by package tools.
    pub size_display: String,
    /// Obsoleted package ids.
    pub obsoletes: Vec<PackageId>,
}

impl ReportEntry {
    /// Builds an entry for a package with its size.
    #[must_use]
    pub fn new(id: PackageId, size: u64, obsoletes: Vec<PackageId>) -> Self {
        Self {
            id,
            size,
            size_display: format_bytes(size),
            obsoletes,
        }
    }
}

/// A non-empty category and its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportGroup {
    /// Category.
    pub category: ReportCategory,
    /// Entries in engine order.
    pub members: Vec<ReportEntry>,
}

/// Machine-readable result of a build step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Resolve outcome.
    pub code: ResolveCode,
    /// Grouped members; empty unless `code` is `ok`.
    #[serde(default)]
    pub groups: Vec<ReportGroup>,
    /// Engine diagnostics in the order the engine produced them.
    #[serde(default)]
    pub messages: Vec<String>,
    /// Targets of the originating call that matched nothing.
    #[serde(default)]
    pub unknown_targets: Vec<String>,
}

impl ResolutionReport {
    /// Folds resolved members and skipped packages into the fixed category
    /// order.
    #[must_use]
    pub fn from_members(
        members: &[TransactionMember],
        skipped: &[(PackageId, u64)],
        messages: Vec<String>,
    ) -> Self {
        let mut groups = Vec::new();
        for category in ReportCategory::ORDER {
            let entries: Vec<ReportEntry> = if category == ReportCategory::Skipped {
                skipped
                    .iter()
                    .map(|(id, size)| ReportEntry::new(id.clone(), *size, Vec::new()))
                    .collect()
            } else {
                members
                    .iter()
                    .filter(|member| member.category() == category)
                    .map(|member| {
                        ReportEntry::new(member.id.clone(), member.size, member.obsoletes.clone())
                    })
                    .collect()
            };
            if !entries.is_empty() {
                groups.push(ReportGroup {
                    category,
                    members: entries,
                });
            }
        }
        Self {
            code: ResolveCode::Ok,
            groups,
            messages,
            unknown_targets: Vec::new(),
        }
    }

    /// Builds a failed report carrying engine messages verbatim.
    #[must_use]
    pub const fn failed(code: ResolveCode, messages: Vec<String>) -> Self {
        Self {
            code,
            groups: Vec::new(),
            messages,
            unknown_targets: Vec::new(),
        }
    }

    /// Returns the entries of one category, if present.
    #[must_use]
    pub fn group(&self, category: ReportCategory) -> Option<&[ReportEntry]> {
        self.groups
            .iter()
            .find(|group| group.category == category)
            .map(|group| group.members.as_slice())
    }

    /// Category order as reported.
    #[must_use]
    pub fn categories(&self) -> Vec<ReportCategory> {
        self.groups.iter().map(|group| group.category).collect()
    }
}
