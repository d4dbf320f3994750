//! Shared fixtures for daemon integration tests.
//!
//! [`ScriptedFactory`] opens in-memory engines over a fixed package list and
//! counts every open, close and apply. Commit behavior (succeed, fail, panic,
//! block until released) is scripted per test.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use async_trait::async_trait;
use pkgd_core::progress::{ProgressSink, TransactionPhase};
use pkgd_core::query::PackageNarrow;
use pkgd_core::{
    MemberAction, OperationKind, Origin, PackageId, ResolveCode, TransactionMember,
};
use pkgd_daemon::auth::{AuthorityError, AuthorizationAuthority, CallerIdentity};
use pkgd_daemon::engine::{
    EngineError, EngineFactory, EngineOptions, PackageEngine, PackageRecord, RepoInfo, Resolution,
    glob_match,
};
use pkgd_daemon::service::{PackageService, ServiceTimeouts};

// =============================================================================
// Engine
// =============================================================================

/// How `apply` behaves.
#[derive(Debug, Clone, Default)]
pub enum ApplyScript {
    /// Succeeds.
    #[default]
    Succeed,
    /// Fails with these engine messages.
    Fail(Vec<String>),
    /// Panics inside the engine.
    Panic,
}

/// Observable engine activity across all engines a factory opened.
#[derive(Debug, Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub applied: AtomicUsize,
    pub apply_started: AtomicBool,
}

impl Counters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

/// Releases an `apply` that was scripted to block.
pub struct ApplyGate(mpsc::Sender<()>);

impl ApplyGate {
    pub fn release(self) {
        let _ = self.0.send(());
    }
}

pub struct ScriptedFactory {
    pub counters: Arc<Counters>,
    packages: Vec<PackageId>,
    apply: Mutex<ApplyScript>,
    blocker: Arc<Mutex<Option<mpsc::Receiver<()>>>>,
    engine_locked: AtomicBool,
}

impl ScriptedFactory {
    /// A factory offering `names` at version 1.0-1 from repository `base`.
    pub fn new(names: &[&str]) -> Self {
        let packages = names.iter().copied().map(package).collect();
        Self {
            counters: Arc::new(Counters::default()),
            packages,
            apply: Mutex::new(ApplyScript::Succeed),
            blocker: Arc::new(Mutex::new(None)),
            engine_locked: AtomicBool::new(false),
        }
    }

    pub fn script_apply(&self, script: ApplyScript) {
        *self.apply.lock().unwrap() = script;
    }

    /// Makes the next `apply` wait until the returned gate is released.
    pub fn block_apply(&self) -> ApplyGate {
        let (tx, rx) = mpsc::channel();
        *self.blocker.lock().unwrap() = Some(rx);
        ApplyGate(tx)
    }

    /// Makes `open` fail as if another process held the engine lock.
    pub fn set_engine_locked(&self, locked: bool) {
        self.engine_locked.store(locked, Ordering::SeqCst);
    }
}

impl EngineFactory for ScriptedFactory {
    fn open(
        &self,
        _options: &EngineOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Box<dyn PackageEngine>, EngineError> {
        if self.engine_locked.load(Ordering::SeqCst) {
            return Err(EngineError::Locked("held by pid 4242".to_string()));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            counters: Arc::clone(&self.counters),
            packages: self.packages.clone(),
            pending: Vec::new(),
            apply: self.apply.lock().unwrap().clone(),
            blocker: Arc::clone(&self.blocker),
            sink,
        }))
    }
}

pub fn package(name: &str) -> PackageId {
    PackageId::new(name, "", "1.0", "1", "noarch", Origin::Repository("base".into())).unwrap()
}

struct ScriptedEngine {
    counters: Arc<Counters>,
    packages: Vec<PackageId>,
    pending: Vec<TransactionMember>,
    apply: ApplyScript,
    blocker: Arc<Mutex<Option<mpsc::Receiver<()>>>>,
    sink: Arc<dyn ProgressSink>,
}

impl ScriptedEngine {
    fn record(id: &PackageId) -> PackageRecord {
        PackageRecord {
            id: id.clone(),
            size: 1024,
            summary: format!("The {} package", id.name),
            description: String::new(),
            url: None,
            license: "MIT".to_string(),
            requires: Vec::new(),
            obsoletes: Vec::new(),
        }
    }

    const fn action(kind: OperationKind) -> MemberAction {
        match kind {
            OperationKind::Install | OperationKind::LocalInstall => MemberAction::Install,
            OperationKind::Remove => MemberAction::Remove,
            OperationKind::Update => MemberAction::Update,
            OperationKind::Reinstall => MemberAction::Reinstall,
            OperationKind::Downgrade => MemberAction::Downgrade,
        }
    }
}

impl PackageEngine for ScriptedEngine {
    fn repositories(&self) -> Vec<RepoInfo> {
        vec![RepoInfo {
            id: "base".to_string(),
            name: "Base".to_string(),
            enabled: true,
            baseurl: None,
        }]
    }

    fn config(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([("assumeyes".to_string(), serde_json::Value::Bool(true))])
    }

    fn packages(&self, narrow: PackageNarrow) -> Vec<PackageRecord> {
        match narrow {
            PackageNarrow::Available => self.packages.iter().map(Self::record).collect(),
            _ => Vec::new(),
        }
    }

    fn packages_by_name(&self, pattern: &str, _newest_only: bool) -> Vec<PackageRecord> {
        self.packages
            .iter()
            .filter(|id| glob_match(pattern, &id.name))
            .map(Self::record)
            .collect()
    }

    fn find(&self, id: &PackageId) -> Option<PackageRecord> {
        self.packages.iter().find(|p| *p == id).map(Self::record)
    }

    fn installed_match(&self, _id: &PackageId) -> Option<PackageId> {
        None
    }

    fn stage(
        &mut self,
        kind: OperationKind,
        target: &str,
    ) -> Result<Vec<TransactionMember>, EngineError> {
        let id = self
            .packages
            .iter()
            .find(|id| id.name == target)
            .cloned()
            .ok_or_else(|| EngineError::NoMatch(target.to_string()))?;
        self.stage_package(kind, &id)
    }

    fn stage_package(
        &mut self,
        kind: OperationKind,
        id: &PackageId,
    ) -> Result<Vec<TransactionMember>, EngineError> {
        if !self.packages.contains(id) {
            return Err(EngineError::NoMatch(id.to_string()));
        }
        let member = TransactionMember::requested(id.clone(), Self::action(kind), 1024);
        self.pending.push(member.clone());
        Ok(vec![member])
    }

    fn stage_all_updates(&mut self) -> Result<Vec<TransactionMember>, EngineError> {
        Ok(Vec::new())
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
        Resolution {
            code: ResolveCode::Ok,
            members: self.pending.clone(),
            skipped: Vec::new(),
            messages: Vec::new(),
        }
    }

    fn apply(&mut self) -> Result<(), EngineError> {
        self.counters.apply_started.store(true, Ordering::SeqCst);
        let blocker = self.blocker.lock().unwrap().take();
        if let Some(rx) = blocker {
            let _ = rx.recv();
        }
        self.counters.applied.fetch_add(1, Ordering::SeqCst);
        self.sink.transaction_event(TransactionPhase::Apply);

        match &self.apply {
            ApplyScript::Succeed => {
                self.pending.clear();
                Ok(())
            },
            ApplyScript::Fail(messages) => Err(EngineError::Transaction(messages.clone())),
            ApplyScript::Panic => panic!("scripted engine panic"),
        }
    }

    fn close(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Authorization
// =============================================================================

/// Grants callers by name and counts authority round trips.
#[derive(Debug, Default)]
pub struct ScriptedAuthority {
    pub denied: Mutex<Vec<String>>,
    pub checks: AtomicUsize,
}

impl ScriptedAuthority {
    pub fn deny(&self, name: &str) {
        self.denied.lock().unwrap().push(name.to_string());
    }

    pub fn allow(&self, name: &str) {
        self.denied.lock().unwrap().retain(|n| n != name);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationAuthority for ScriptedAuthority {
    async fn check_authorization(&self, caller: &CallerIdentity) -> Result<bool, AuthorityError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let denied = self.denied.lock().unwrap();
        Ok(!denied.iter().any(|n| n == caller.name()))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub service: Arc<PackageService>,
    pub factory: Arc<ScriptedFactory>,
    pub authority: Arc<ScriptedAuthority>,
}

impl Harness {
    pub fn new(names: &[&str]) -> Self {
        Self::with_timeouts(names, ServiceTimeouts::default())
    }

    pub fn with_timeouts(names: &[&str], timeouts: ServiceTimeouts) -> Self {
        let factory = Arc::new(ScriptedFactory::new(names));
        let authority = Arc::new(ScriptedAuthority::default());
        let service = Arc::new(PackageService::new(
            Arc::clone(&authority) as Arc<dyn AuthorizationAuthority>,
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
            timeouts,
        ));
        Self {
            service,
            factory,
            authority,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.factory.counters
    }
}

pub fn caller(n: u64) -> CallerIdentity {
    CallerIdentity::connection(n, None)
}
