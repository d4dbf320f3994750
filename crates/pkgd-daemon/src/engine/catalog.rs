//! File-backed reference engine.
//!
//! The catalog is one JSON document holding configuration, repositories and
//! the available and installed package sets:
//!
//! ```json
//! {
//!   "config": { "skip_broken": false },
//!   "repositories": [ { "id": "base", "name": "Base", "enabled": true } ],
//!   "available": [ { "name": "foo", "epoch": "0", "version": "1.0",
//!                    "release": "1", "arch": "noarch", "repo": "base",
//!                    "size": 1024, "requires": ["libfoo"] } ],
//!   "installed": []
//! }
//! ```
//!
//! Opening the engine takes an exclusive `fs2` lock on a sibling lock file,
//! held until [`PackageEngine::close`]. A commit rewrites the installed set
//! through a temporary file and a rename.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use pkgd_core::package::{format_bytes, format_duration};
use pkgd_core::progress::{
    ApplyAction, ApplyProgress, DownloadProgress, ProgressSink, TransactionPhase,
};
use pkgd_core::query::PackageNarrow;
use pkgd_core::{MemberAction, OperationKind, Origin, PackageId, ResolveCode, TransactionMember};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::version::{evr_cmp, glob_match};
use super::{
    EngineError, EngineFactory, EngineOptions, PackageEngine, PackageRecord, RepoInfo, Resolution,
};

/// Origin given to packages read from a local file.
const COMMANDLINE_REPO: &str = "commandline";

/// Config key enabling skip-broken resolution.
const SKIP_BROKEN_KEY: &str = "skip_broken";

// =============================================================================
// Catalog document
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Catalog {
    #[serde(default)]
    config: BTreeMap<String, Value>,
    #[serde(default)]
    repositories: Vec<RepoInfo>,
    #[serde(default)]
    available: Vec<CatalogPackage>,
    #[serde(default)]
    installed: Vec<CatalogPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CatalogPackage {
    name: String,
    #[serde(default)]
    epoch: String,
    version: String,
    release: String,
    arch: String,
    /// Repository the package is offered by (available) or was installed
    /// from (installed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repo: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default)]
    license: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    obsoletes: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    recent: bool,
}

impl CatalogPackage {
    fn id(&self, origin: Origin) -> Result<PackageId, EngineError> {
        PackageId::new(
            self.name.as_str(),
            self.epoch.as_str(),
            self.version.as_str(),
            self.release.as_str(),
            self.arch.as_str(),
            origin,
        )
        .map_err(|e| EngineError::InvalidPackage(format!("{}: {e}", self.name)))
    }

    fn available_origin(&self) -> Origin {
        Origin::Repository(self.repo.clone().unwrap_or_default())
    }

    fn record(&self, id: PackageId) -> PackageRecord {
        PackageRecord {
            id,
            size: self.size,
            summary: self.summary.clone(),
            description: self.description.clone(),
            url: self.url.clone(),
            license: self.license.clone(),
            requires: self.requires.clone(),
            obsoletes: self.obsoletes.clone(),
        }
    }

    fn is_build(&self, id: &PackageId) -> bool {
        self.name == id.name
            && self.epoch == id.epoch
            && self.version == id.version
            && self.release == id.release
            && self.arch == id.arch
    }
}

fn load_catalog(path: &Path) -> Result<Catalog, EngineError> {
    let content = fs::read_to_string(path).map_err(|e| {
        EngineError::Catalog(format!("failed to read {}: {e}", path.display()))
    })?;
    let catalog: Catalog = serde_json::from_str(&content)
        .map_err(|e| EngineError::Catalog(format!("failed to parse {}: {e}", path.display())))?;

    for pkg in &catalog.available {
        if pkg.repo.as_deref().is_none_or(str::is_empty) {
            return Err(EngineError::Catalog(format!(
                "available package {} has no repository",
                pkg.name
            )));
        }
        pkg.id(pkg.available_origin())
            .map_err(|e| EngineError::Catalog(e.to_string()))?;
    }
    for pkg in &catalog.installed {
        pkg.id(Origin::Installed)
            .map_err(|e| EngineError::Catalog(e.to_string()))?;
    }
    Ok(catalog)
}

// =============================================================================
// Engine
// =============================================================================

/// Opens [`CatalogEngine`]s over one catalog file.
#[derive(Debug, Clone)]
pub struct CatalogFactory {
    catalog: PathBuf,
    lock_path: PathBuf,
}

impl CatalogFactory {
    /// Creates a factory for `catalog`, locking `lock_path` while an engine
    /// is open.
    #[must_use]
    pub const fn new(catalog: PathBuf, lock_path: PathBuf) -> Self {
        Self { catalog, lock_path }
    }
}

impl EngineFactory for CatalogFactory {
    fn open(
        &self,
        options: &EngineOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Box<dyn PackageEngine>, EngineError> {
        let engine = CatalogEngine::open(&self.catalog, &self.lock_path, options.clone(), sink)?;
        Ok(Box::new(engine))
    }
}

/// Engine over a JSON catalog file.
pub struct CatalogEngine {
    path: PathBuf,
    catalog: Catalog,
    local: Vec<CatalogPackage>,
    pending: Vec<TransactionMember>,
    lock: Option<File>,
    options: EngineOptions,
    sink: Arc<dyn ProgressSink>,
}

/// A requirement that could not be satisfied, attributed to the requested
/// member that pulled it in.
struct Problem {
    root: usize,
    message: String,
}

impl CatalogEngine {
    /// Takes the engine lock and loads the catalog.
    pub fn open(
        path: &Path,
        lock_path: &Path,
        options: EngineOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self, EngineError> {
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        lock.try_lock_exclusive().map_err(|e| {
            EngineError::Locked(format!(
                "{} is locked by another process: {e}",
                lock_path.display()
            ))
        })?;

        let catalog = load_catalog(path)?;
        info!(
            catalog = %path.display(),
            available = catalog.available.len(),
            installed = catalog.installed.len(),
            "Catalog loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            catalog,
            local: Vec::new(),
            pending: Vec::new(),
            lock: Some(lock),
            options,
            sink,
        })
    }

    // -------------------------------------------------------------------------
    // Package sets
    // -------------------------------------------------------------------------

    fn enabled_repos(&self) -> HashSet<&str> {
        self.catalog
            .repositories
            .iter()
            .filter(|repo| repo.enabled)
            .map(|repo| repo.id.as_str())
            .collect()
    }

    /// Packages offered by enabled repositories and local files.
    fn available(&self) -> Vec<(PackageRecord, &CatalogPackage)> {
        let enabled = self.enabled_repos();
        self.catalog
            .available
            .iter()
            .filter(|pkg| pkg.repo.as_deref().is_some_and(|repo| enabled.contains(repo)))
            .chain(&self.local)
            .filter_map(|pkg| pkg.id(pkg.available_origin()).ok().map(|id| (pkg.record(id), pkg)))
            .collect()
    }

    fn installed(&self) -> Vec<PackageRecord> {
        self.catalog
            .installed
            .iter()
            .filter_map(|pkg| pkg.id(Origin::Installed).ok().map(|id| pkg.record(id)))
            .collect()
    }

    fn available_records(&self) -> Vec<PackageRecord> {
        self.available().into_iter().map(|(record, _)| record).collect()
    }

    fn newest_installed(&self, name: &str, arch: &str) -> Option<PackageRecord> {
        self.installed()
            .into_iter()
            .filter(|pkg| pkg.id.name == name && pkg.id.arch == arch)
            .max_by(|a, b| evr_cmp(&a.id, &b.id))
    }

    fn newest_available_by(
        &self,
        pred: impl Fn(&PackageRecord) -> bool,
    ) -> Option<PackageRecord> {
        self.available_records()
            .into_iter()
            .filter(|pkg| pred(pkg))
            .max_by(|a, b| evr_cmp(&a.id, &b.id))
    }

    fn is_installed_build(&self, id: &PackageId) -> bool {
        self.catalog.installed.iter().any(|pkg| pkg.is_build(id))
    }

    /// Newest available version strictly newer than `installed`.
    fn update_for(&self, installed: &PackageRecord) -> Option<PackageRecord> {
        self.newest_available_by(|pkg| {
            pkg.id.name == installed.id.name
                && pkg.id.arch == installed.id.arch
                && evr_cmp(&pkg.id, &installed.id).is_gt()
        })
    }

    /// Available packages that obsolete `installed` and are not installed.
    fn obsoleters_of(&self, installed: &PackageRecord) -> Vec<PackageRecord> {
        self.available_records()
            .into_iter()
            .filter(|pkg| {
                pkg.obsoletes.contains(&installed.id.name) && !self.is_installed_build(&pkg.id)
            })
            .collect()
    }

    fn matching_installed(&self, pattern: &str) -> Vec<PackageRecord> {
        self.installed()
            .into_iter()
            .filter(|pkg| glob_match(pattern, &pkg.id.name))
            .collect()
    }

    fn find_available(&self, id: &PackageId) -> Option<PackageRecord> {
        self.available_records()
            .into_iter()
            .find(|pkg| pkg.id.same_build(id) && pkg.id.origin == id.origin)
    }

    fn find_installed(&self, id: &PackageId) -> Option<PackageRecord> {
        self.installed().into_iter().find(|pkg| pkg.id.same_build(id))
    }

    /// The same build offered by an enabled repository.
    fn reinstall_candidate(&self, installed: &PackageRecord) -> Option<PackageRecord> {
        self.newest_available_by(|pkg| pkg.id.same_build(&installed.id))
    }

    /// Newest available version strictly older than `installed`.
    fn downgrade_candidate(&self, installed: &PackageRecord) -> Option<PackageRecord> {
        self.newest_available_by(|pkg| {
            pkg.id.name == installed.id.name
                && pkg.id.arch == installed.id.arch
                && evr_cmp(&pkg.id, &installed.id).is_lt()
        })
    }

    fn config_flag(&self, key: &str) -> bool {
        self.catalog
            .config
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    // -------------------------------------------------------------------------
    // Staging
    // -------------------------------------------------------------------------

    /// Appends members not already pending; returns the ones added.
    fn push(&mut self, members: Vec<TransactionMember>) -> Vec<TransactionMember> {
        let mut added = Vec::new();
        for member in members {
            let duplicate = self
                .pending
                .iter()
                .any(|p| p.id == member.id && p.action == member.action);
            if !duplicate {
                self.pending.push(member.clone());
                added.push(member);
            }
        }
        added
    }

    /// Install, or update when an older build is installed.
    fn install_member(&self, candidate: &PackageRecord) -> Option<TransactionMember> {
        match self.newest_installed(&candidate.id.name, &candidate.id.arch) {
            None => Some(TransactionMember::requested(
                candidate.id.clone(),
                MemberAction::Install,
                candidate.size,
            )),
            Some(installed) if evr_cmp(&candidate.id, &installed.id).is_gt() => {
                Some(TransactionMember::requested(
                    candidate.id.clone(),
                    MemberAction::Update,
                    candidate.size,
                ))
            },
            Some(_) => None,
        }
    }

    fn stage_install(&self, pattern: &str) -> Result<Vec<TransactionMember>, EngineError> {
        let mut newest: BTreeMap<(String, String), PackageRecord> = BTreeMap::new();
        for pkg in self.available_records() {
            if !glob_match(pattern, &pkg.id.name) {
                continue;
            }
            let key = (pkg.id.name.clone(), pkg.id.arch.clone());
            match newest.get(&key) {
                Some(current) if evr_cmp(&current.id, &pkg.id).is_ge() => {},
                _ => {
                    newest.insert(key, pkg);
                },
            }
        }

        if newest.is_empty() {
            if self.matching_installed(pattern).is_empty() {
                return Err(EngineError::NoMatch(pattern.to_string()));
            }
            debug!(pattern, "Already installed");
        }
        Ok(newest
            .values()
            .filter_map(|candidate| self.install_member(candidate))
            .collect())
    }

    fn stage_remove(&self, pattern: &str) -> Result<Vec<TransactionMember>, EngineError> {
        let installed = self.matching_installed(pattern);
        if installed.is_empty() {
            return Err(EngineError::NoMatch(pattern.to_string()));
        }
        Ok(installed
            .into_iter()
            .map(|pkg| TransactionMember::requested(pkg.id, MemberAction::Remove, pkg.size))
            .collect())
    }

    /// Updates for a set of installed packages. An obsoleting package takes
    /// precedence over a plain update.
    fn updates_for(&self, installed: Vec<PackageRecord>) -> Vec<TransactionMember> {
        let mut members: Vec<TransactionMember> = Vec::new();
        for pkg in installed {
            let obsoleters = self.obsoleters_of(&pkg);
            if obsoleters.is_empty() {
                if let Some(update) = self.update_for(&pkg) {
                    members.push(TransactionMember::requested(
                        update.id,
                        MemberAction::Update,
                        update.size,
                    ));
                }
                continue;
            }
            for obsoleter in obsoleters {
                if let Some(existing) = members
                    .iter_mut()
                    .find(|m| m.id == obsoleter.id && m.action == MemberAction::Obsolete)
                {
                    existing.obsoletes.push(pkg.id.clone());
                } else {
                    let mut member = TransactionMember::requested(
                        obsoleter.id,
                        MemberAction::Obsolete,
                        obsoleter.size,
                    );
                    member.obsoletes.push(pkg.id.clone());
                    members.push(member);
                }
            }
        }
        members
    }

    fn stage_update(&self, pattern: &str) -> Result<Vec<TransactionMember>, EngineError> {
        let installed = self.matching_installed(pattern);
        if installed.is_empty() {
            return Err(EngineError::NoMatch(pattern.to_string()));
        }
        Ok(self.updates_for(installed))
    }

    fn stage_reinstall(&self, pattern: &str) -> Result<Vec<TransactionMember>, EngineError> {
        let members: Vec<_> = self
            .matching_installed(pattern)
            .iter()
            .filter_map(|installed| self.reinstall_candidate(installed))
            .map(|pkg| TransactionMember::requested(pkg.id, MemberAction::Reinstall, pkg.size))
            .collect();
        if members.is_empty() {
            return Err(EngineError::NoMatch(pattern.to_string()));
        }
        Ok(members)
    }

    fn stage_downgrade(&self, pattern: &str) -> Result<Vec<TransactionMember>, EngineError> {
        let members: Vec<_> = self
            .matching_installed(pattern)
            .iter()
            .filter_map(|installed| self.downgrade_candidate(installed))
            .map(|pkg| TransactionMember::requested(pkg.id, MemberAction::Downgrade, pkg.size))
            .collect();
        if members.is_empty() {
            return Err(EngineError::NoMatch(pattern.to_string()));
        }
        Ok(members)
    }

    fn stage_local(&mut self, path: &str) -> Result<Vec<TransactionMember>, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NoMatch(path.to_string()));
            },
            Err(e) => return Err(e.into()),
        };
        let mut pkg: CatalogPackage = serde_json::from_str(&content)
            .map_err(|e| EngineError::InvalidPackage(format!("{path}: {e}")))?;
        pkg.repo = Some(COMMANDLINE_REPO.to_string());
        let id = pkg.id(pkg.available_origin())?;
        let record = pkg.record(id);

        if !self.local.iter().any(|local| local.is_build(&record.id)) {
            self.local.push(pkg);
        }
        Ok(self.install_member(&record).into_iter().collect())
    }

    // -------------------------------------------------------------------------
    // Solving
    // -------------------------------------------------------------------------

    /// Source record of a requested member.
    fn member_record(&self, member: &TransactionMember) -> Option<PackageRecord> {
        if member.action == MemberAction::Remove {
            self.find_installed(&member.id)
        } else {
            self.find_available(&member.id)
        }
    }

    /// Expands `requested` with dependency members.
    fn solve(&self, requested: &[TransactionMember]) -> (Vec<TransactionMember>, Vec<Problem>) {
        let installed = self.installed();
        let mut members = requested.to_vec();
        let mut problems = Vec::new();

        let mut removing: BTreeSet<String> = requested
            .iter()
            .filter(|m| m.action == MemberAction::Remove)
            .map(|m| m.id.name.clone())
            .chain(
                requested
                    .iter()
                    .flat_map(|m| m.obsoletes.iter().map(|id| id.name.clone())),
            )
            .collect();
        let mut provided: HashSet<String> = installed
            .iter()
            .map(|pkg| pkg.id.name.clone())
            .filter(|name| !removing.contains(name))
            .chain(
                requested
                    .iter()
                    .filter(|m| m.action != MemberAction::Remove)
                    .map(|m| m.id.name.clone()),
            )
            .collect();

        let mut queue = VecDeque::new();
        for (root, member) in requested.iter().enumerate() {
            match self.member_record(member) {
                Some(record) if member.action != MemberAction::Remove => {
                    queue.push_back((root, record));
                },
                Some(_) => {},
                None => problems.push(Problem {
                    root,
                    message: format!("Package {} is no longer available", member.id.nevra()),
                }),
            }
        }

        while let Some((root, record)) = queue.pop_front() {
            for requirement in &record.requires {
                if provided.contains(requirement) {
                    continue;
                }
                match self.newest_available_by(|pkg| &pkg.id.name == requirement) {
                    Some(dep) => {
                        provided.insert(requirement.clone());
                        members.push(TransactionMember::dependency(
                            dep.id.clone(),
                            MemberAction::Install,
                            dep.size,
                        ));
                        queue.push_back((root, dep));
                    },
                    None => problems.push(Problem {
                        root,
                        message: format!(
                            "Missing dependency: {requirement} is needed by package {}",
                            record.id.nevra()
                        ),
                    }),
                }
            }
        }

        // Installed packages that require something being removed go too.
        loop {
            let dependents: Vec<&PackageRecord> = installed
                .iter()
                .filter(|pkg| !removing.contains(&pkg.id.name))
                .filter(|pkg| {
                    pkg.requires
                        .iter()
                        .any(|r| removing.contains(r) && !provided.contains(r))
                })
                .collect();
            if dependents.is_empty() {
                break;
            }
            for pkg in dependents {
                removing.insert(pkg.id.name.clone());
                provided.remove(&pkg.id.name);
                members.push(TransactionMember::dependency(
                    pkg.id.clone(),
                    MemberAction::Remove,
                    pkg.size,
                ));
            }
        }

        (members, problems)
    }

    // -------------------------------------------------------------------------
    // Applying
    // -------------------------------------------------------------------------

    fn source_package(&self, id: &PackageId) -> Option<CatalogPackage> {
        self.catalog
            .available
            .iter()
            .chain(&self.local)
            .find(|pkg| pkg.is_build(id) && pkg.repo.as_deref() == id.origin.repository())
            .cloned()
    }

    /// Applies one member to the installed set. Returns the ids it replaced.
    fn apply_member(&mut self, member: &TransactionMember) -> Result<Vec<PackageId>, EngineError> {
        if member.action == MemberAction::Remove {
            self.catalog.installed.retain(|pkg| !pkg.is_build(&member.id));
            return Ok(Vec::new());
        }

        let pkg = self
            .source_package(&member.id)
            .ok_or_else(|| EngineError::Transaction(vec![format!(
                "Package {} is no longer available",
                member.id.nevra()
            )]))?;

        let installed = &mut self.catalog.installed;
        let mut replaced = Vec::new();
        installed.retain(|existing| {
            let same_slot = existing.name == pkg.name && existing.arch == pkg.arch;
            let obsoleted = member.obsoletes.iter().any(|id| existing.is_build(id));
            if same_slot || obsoleted {
                if let Ok(id) = existing.id(Origin::Installed) {
                    replaced.push(id);
                }
                false
            } else {
                true
            }
        });
        installed.push(pkg);
        Ok(replaced)
    }

    fn persist(&self) -> Result<(), EngineError> {
        let content = serde_json::to_vec_pretty(&self.catalog)
            .map_err(|e| EngineError::Catalog(e.to_string()))?;

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp_path)?;
        file.write_all(&content)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(catalog = %self.path.display(), "Catalog written");
        Ok(())
    }
}

const fn apply_action(action: MemberAction) -> ApplyAction {
    match action {
        MemberAction::Install | MemberAction::Reinstall | MemberAction::Downgrade => {
            ApplyAction::Install
        },
        MemberAction::Update => ApplyAction::Update,
        MemberAction::Obsolete => ApplyAction::Obsolete,
        MemberAction::Remove => ApplyAction::Erase,
    }
}

impl PackageEngine for CatalogEngine {
    fn repositories(&self) -> Vec<RepoInfo> {
        self.catalog.repositories.clone()
    }

    fn config(&self) -> BTreeMap<String, Value> {
        let mut config = self.catalog.config.clone();
        config
            .entry("assumeyes".to_string())
            .or_insert(Value::from(self.options.assume_yes));
        config
            .entry("debuglevel".to_string())
            .or_insert(Value::from(self.options.debug_level));
        config
            .entry("errorlevel".to_string())
            .or_insert(Value::from(self.options.error_level));
        config
    }

    fn packages(&self, narrow: PackageNarrow) -> Vec<PackageRecord> {
        match narrow {
            PackageNarrow::Installed => self.installed(),
            PackageNarrow::Available => self
                .available_records()
                .into_iter()
                .filter(|pkg| !self.is_installed_build(&pkg.id))
                .collect(),
            PackageNarrow::Updates => self
                .installed()
                .iter()
                .filter_map(|pkg| self.update_for(pkg))
                .collect(),
            PackageNarrow::Obsoletes => {
                let mut seen = HashSet::new();
                self.installed()
                    .iter()
                    .flat_map(|pkg| self.obsoleters_of(pkg))
                    .filter(|pkg| seen.insert(pkg.id.clone()))
                    .collect()
            },
            PackageNarrow::Recent => self
                .available()
                .into_iter()
                .filter(|(_, pkg)| pkg.recent)
                .map(|(record, _)| record)
                .collect(),
            PackageNarrow::Extras => {
                let offered: HashSet<String> = self
                    .available_records()
                    .into_iter()
                    .map(|pkg| pkg.id.name)
                    .collect();
                self.installed()
                    .into_iter()
                    .filter(|pkg| !offered.contains(&pkg.id.name))
                    .collect()
            },
        }
    }

    fn packages_by_name(&self, pattern: &str, newest_only: bool) -> Vec<PackageRecord> {
        let matches = self
            .installed()
            .into_iter()
            .chain(self.available_records())
            .filter(|pkg| glob_match(pattern, &pkg.id.name));
        if !newest_only {
            return matches.collect();
        }

        let mut newest: BTreeMap<(String, String), PackageRecord> = BTreeMap::new();
        for pkg in matches {
            let key = (pkg.id.name.clone(), pkg.id.arch.clone());
            match newest.get(&key) {
                // Installed builds come first and win ties.
                Some(current) if evr_cmp(&current.id, &pkg.id).is_ge() => {},
                _ => {
                    newest.insert(key, pkg);
                },
            }
        }
        newest.into_values().collect()
    }

    // `installed` and `@repo` ids both name the installed build.
    fn find(&self, id: &PackageId) -> Option<PackageRecord> {
        if id.origin.is_local() {
            self.find_installed(id)
        } else {
            self.find_available(id)
        }
    }

    fn installed_match(&self, id: &PackageId) -> Option<PackageId> {
        self.find_installed(id).map(|pkg| pkg.id)
    }

    fn stage(
        &mut self,
        kind: OperationKind,
        target: &str,
    ) -> Result<Vec<TransactionMember>, EngineError> {
        let members = match kind {
            OperationKind::Install => self.stage_install(target)?,
            OperationKind::Remove => self.stage_remove(target)?,
            OperationKind::Update => self.stage_update(target)?,
            OperationKind::Reinstall => self.stage_reinstall(target)?,
            OperationKind::Downgrade => self.stage_downgrade(target)?,
            OperationKind::LocalInstall => self.stage_local(target)?,
        };
        Ok(self.push(members))
    }

    fn stage_package(
        &mut self,
        kind: OperationKind,
        id: &PackageId,
    ) -> Result<Vec<TransactionMember>, EngineError> {
        let not_found = || EngineError::NoMatch(id.to_string());
        let members = match kind {
            OperationKind::Remove => {
                let pkg = self.find_installed(id).ok_or_else(not_found)?;
                vec![TransactionMember::requested(pkg.id, MemberAction::Remove, pkg.size)]
            },
            OperationKind::Install => {
                let pkg = self.find_available(id).ok_or_else(not_found)?;
                self.install_member(&pkg).into_iter().collect()
            },
            OperationKind::Update if id.origin.is_local() => {
                let installed = self.find_installed(id).ok_or_else(not_found)?;
                self.updates_for(vec![installed])
            },
            OperationKind::Update => {
                let pkg = self.find_available(id).ok_or_else(not_found)?;
                let obsoleted: Vec<PackageId> = self
                    .installed()
                    .into_iter()
                    .filter(|installed| pkg.obsoletes.contains(&installed.id.name))
                    .map(|installed| installed.id)
                    .collect();
                let action = if obsoleted.is_empty() {
                    MemberAction::Update
                } else {
                    MemberAction::Obsolete
                };
                let mut member = TransactionMember::requested(pkg.id, action, pkg.size);
                member.obsoletes = obsoleted;
                vec![member]
            },
            OperationKind::Reinstall => {
                let pkg = if id.origin.is_local() {
                    self.find_installed(id)
                        .and_then(|installed| self.reinstall_candidate(&installed))
                } else {
                    self.find_available(id)
                };
                let pkg = pkg.ok_or_else(not_found)?;
                vec![TransactionMember::requested(pkg.id, MemberAction::Reinstall, pkg.size)]
            },
            OperationKind::Downgrade => {
                let pkg = if id.origin.is_local() {
                    self.find_installed(id)
                        .and_then(|installed| self.downgrade_candidate(&installed))
                } else {
                    self.find_available(id)
                };
                let pkg = pkg.ok_or_else(not_found)?;
                vec![TransactionMember::requested(pkg.id, MemberAction::Downgrade, pkg.size)]
            },
            OperationKind::LocalInstall => {
                return Err(EngineError::InvalidPackage(
                    "local install takes a file path".to_string(),
                ));
            },
        };
        Ok(self.push(members))
    }

    fn stage_all_updates(&mut self) -> Result<Vec<TransactionMember>, EngineError> {
        let members = self.updates_for(self.installed());
        Ok(self.push(members))
    }

    fn pending(&self) -> Vec<TransactionMember> {
        self.pending.clone()
    }

    fn clear(&mut self) {
        self.pending.clear();
    }

    fn resolve(&mut self) -> Resolution {
        if self.pending.is_empty() {
            return Resolution::messages(ResolveCode::Needed, vec!["Nothing to do".to_string()]);
        }

        let skip_broken = self.config_flag(SKIP_BROKEN_KEY);
        let mut requested = self.pending.clone();
        let mut skipped = Vec::new();
        let mut messages = Vec::new();
        loop {
            let (members, problems) = self.solve(&requested);
            if problems.is_empty() {
                return Resolution {
                    code: ResolveCode::Ok,
                    members,
                    skipped,
                    messages,
                };
            }

            messages.extend(problems.iter().map(|p| p.message.clone()));
            if !skip_broken {
                return Resolution::messages(ResolveCode::Error, messages);
            }

            let roots: BTreeSet<usize> = problems.iter().map(|p| p.root).collect();
            for root in roots.into_iter().rev() {
                let member = requested.remove(root);
                messages.push(format!("Skipping {}", member.id.nevra()));
                skipped.push((member.id, member.size));
            }
        }
    }

    fn apply(&mut self) -> Result<(), EngineError> {
        let resolution = self.resolve();
        match resolution.code {
            ResolveCode::Ok => {},
            ResolveCode::Needed => return Ok(()),
            ResolveCode::Error => return Err(EngineError::Transaction(resolution.messages)),
        }
        let members = resolution.members;

        self.sink.transaction_event(TransactionPhase::Download);
        let started = Instant::now();
        for member in members.iter().filter(|m| m.action != MemberAction::Remove) {
            self.sink.download_progress(DownloadProgress {
                name: format!("{}.rpm", member.id.nevra()),
                frac: 1.0,
                fread: format_bytes(member.size),
                ftime: format_duration(started.elapsed()),
            });
        }

        self.sink.transaction_event(TransactionPhase::SignatureCheck);
        self.sink.transaction_event(TransactionPhase::TestTransaction);
        if let Some(missing) = members
            .iter()
            .filter(|m| m.action != MemberAction::Remove)
            .find(|m| self.source_package(&m.id).is_none())
        {
            return Err(EngineError::Transaction(vec![format!(
                "Test transaction failed: {} is no longer available",
                missing.id.nevra()
            )]));
        }

        self.sink.transaction_event(TransactionPhase::Apply);
        let total = members.len() as u64;
        let mut cleanups = Vec::new();
        for (n, member) in (1_u64..).zip(&members) {
            self.sink.rpm_progress(ApplyProgress {
                package: member.id.to_string(),
                action: apply_action(member.action),
                te_current: member.size,
                te_total: member.size,
                ts_current: n,
                ts_total: total,
            });
            cleanups.extend(self.apply_member(member)?);
        }
        for old in cleanups {
            self.sink.rpm_progress(ApplyProgress {
                package: old.to_string(),
                action: ApplyAction::Cleanup,
                te_current: 0,
                te_total: 0,
                ts_current: total,
                ts_total: total,
            });
        }

        self.persist()?;
        self.pending.clear();
        info!(members = total, "Transaction applied");
        Ok(())
    }

    fn close(&mut self) {
        self.pending.clear();
        if let Some(lock) = self.lock.take() {
            if let Err(e) = FileExt::unlock(&lock) {
                warn!(error = %e, "Failed to release engine lock");
            }
        }
    }
}
