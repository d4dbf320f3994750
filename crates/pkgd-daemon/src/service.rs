//! The package service.
//!
//! [`PackageService`] is the transport-independent method table of the
//! daemon. Every privileged call follows the same path:
//!
//! 1. the caller is checked against the [`AuthorizationGate`];
//! 2. the session mutex is taken (queueing behind any call in flight);
//! 3. the caller must hold the session lock, except for `Lock`/`Unlock`;
//! 4. a [`WorkGuard`] marks the daemon busy for the watchdog;
//! 5. the engine work runs on a blocking thread that owns the session guard.
//!
//! Steps 2 to 5 are bounded by the call deadline. A call that overruns
//! reports [`DaemonError::Timeout`]; the blocking work is never cancelled and
//! keeps the session until it finishes.

use std::sync::Arc;
use std::time::Duration;

use pkgd_core::config::TimeoutSection;
use pkgd_core::ipc::{Call, Reply};
use pkgd_core::progress::TransactionPhase;
use pkgd_core::query::{Lookup, PackageAttribute, PackageNarrow};
use pkgd_core::{DAEMON_VERSION, OperationKind, PackageId};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthorizationAuthority, AuthorizationGate, CallerIdentity};
use crate::engine::{EngineFactory, EngineLifecycle, EngineOptions, PackageEngine, glob_match};
use crate::error::{DaemonError, DaemonResult};
use crate::progress::ProgressReporter;
use crate::session::SessionLock;
use crate::state::ShutdownSignal;
use crate::transaction::{TransactionBuilder, package_id_list};
use crate::watchdog::{ActivityMonitor, Watchdog, WatchdogPhase, WorkGuard};

// =============================================================================
// Configuration
// =============================================================================

/// Call deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimeouts {
    /// Deadline for every privileged call except the commit.
    pub call: Duration,
    /// Deadline for `RunTransaction`.
    pub run: Duration,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self::from(&TimeoutSection::default())
    }
}

impl From<&TimeoutSection> for ServiceTimeouts {
    fn from(section: &TimeoutSection) -> Self {
        Self {
            call: Duration::from_secs(section.call_secs),
            run: Duration::from_secs(section.run_secs),
        }
    }
}

/// Whether a privileged call requires the caller to hold the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Holder,
    Any,
}

/// What a blocking work closure gets besides the session.
struct WorkContext {
    caller: CallerIdentity,
    reporter: ProgressReporter,
    monitor: Arc<ActivityMonitor>,
}

/// Ends the session when dropped, including during unwinding.
struct CommitScope<'a>(&'a mut SessionLock);

impl Drop for CommitScope<'_> {
    fn drop(&mut self) {
        self.0.end_session();
    }
}

// =============================================================================
// Service
// =============================================================================

/// Dispatches calls against the single package session.
pub struct PackageService {
    gate: AuthorizationGate,
    session: Arc<Mutex<SessionLock>>,
    monitor: Arc<ActivityMonitor>,
    reporter: ProgressReporter,
    shutdown: Arc<ShutdownSignal>,
    timeouts: ServiceTimeouts,
}

impl PackageService {
    /// Creates a service with no session and no engine open.
    #[must_use]
    pub fn new(
        authority: Arc<dyn AuthorizationAuthority>,
        factory: Arc<dyn EngineFactory>,
        timeouts: ServiceTimeouts,
    ) -> Self {
        let reporter = ProgressReporter::default();
        let engine = EngineLifecycle::new(
            factory,
            Arc::new(reporter.clone()),
            EngineOptions::default(),
        );
        Self {
            gate: AuthorizationGate::new(authority),
            session: Arc::new(Mutex::new(SessionLock::new(engine))),
            monitor: ActivityMonitor::new(),
            reporter,
            shutdown: Arc::new(ShutdownSignal::new()),
            timeouts,
        }
    }

    /// Progress broadcaster; connections subscribe here.
    #[must_use]
    pub const fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Activity flags sampled by the watchdog.
    #[must_use]
    pub const fn monitor(&self) -> &Arc<ActivityMonitor> {
        &self.monitor
    }

    /// Shutdown signal shared with the transport and the signal handler.
    #[must_use]
    pub const fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Current session holder. Waits for any call in flight.
    pub async fn holder(&self) -> Option<String> {
        self.session.lock().await.holder().map(str::to_string)
    }

    /// Returns `true` while an engine is open. Waits for any call in flight.
    pub async fn has_engine(&self) -> bool {
        self.session.lock().await.has_engine()
    }

    /// Handles one call from `caller`.
    pub async fn call(&self, caller: &CallerIdentity, call: Call) -> DaemonResult<Reply> {
        let method = call.method();
        debug!(caller = %caller, method, "Handling call");

        let result = self.dispatch(caller, call).await;
        match &result {
            Err(e @ (DaemonError::Timeout { .. } | DaemonError::Internal(_))) => {
                warn!(caller = %caller, method, error = %e, "Call failed");
            },
            Err(e) => debug!(caller = %caller, method, error = %e, "Call refused"),
            Ok(_) => {},
        }
        result
    }

    async fn dispatch(&self, caller: &CallerIdentity, call: Call) -> DaemonResult<Reply> {
        match call {
            Call::GetVersion => Ok(Reply::Int(DAEMON_VERSION)),
            // Subscription state belongs to the connection.
            Call::Subscribe => Ok(Reply::Unit),
            Call::Lock => self.lock(caller).await.map(Reply::Bool),
            Call::Unlock => self.unlock(caller).await.map(Reply::Bool),
            Call::Exit => self.exit(caller).await.map(Reply::Bool),

            Call::GetRepositories { filter } => {
                self.with_engine(caller, move |engine, _| {
                    Ok(Reply::Strings(repository_ids(engine, &filter)))
                })
                .await
            },
            Call::GetConfig { key } => {
                self.with_engine(caller, move |engine, _| {
                    let config = engine.config();
                    let lookup = if key == "*" {
                        Lookup::Found(serde_json::Value::Object(config.into_iter().collect()))
                    } else {
                        Lookup::from(config.get(&key).cloned())
                    };
                    json_reply(&lookup)
                })
                .await
            },
            Call::GetRepo { id } => {
                self.with_engine(caller, move |engine, _| {
                    let repo = engine.repositories().into_iter().find(|repo| repo.id == id);
                    json_reply(&Lookup::from(repo))
                })
                .await
            },
            Call::GetPackages { narrow } => {
                self.with_engine(caller, move |engine, _| {
                    let ids = match narrow.parse::<PackageNarrow>() {
                        Ok(narrow) => package_id_list(&*engine, engine.packages(narrow)),
                        Err(()) => Vec::new(),
                    };
                    Ok(Reply::Strings(ids))
                })
                .await
            },
            Call::GetPackagesByName {
                pattern,
                newest_only,
            } => {
                self.with_engine(caller, move |engine, _| {
                    let records = engine.packages_by_name(&pattern, newest_only);
                    Ok(Reply::Strings(package_id_list(&*engine, records)))
                })
                .await
            },
            Call::GetAttribute { id, attr } => {
                self.with_engine(caller, move |engine, _| {
                    let package: PackageId = id.parse().map_err(|e| {
                        DaemonError::InvalidRequest(format!("bad package id {id:?}: {e}"))
                    })?;
                    let lookup = match attr.parse::<PackageAttribute>() {
                        Err(()) => Lookup::Unsupported,
                        Ok(attr) => engine
                            .find(&package)
                            .map_or(Lookup::NotFound, |record| record.attribute(attr)),
                    };
                    json_reply(&lookup)
                })
                .await
            },

            Call::Install { patterns } => self.build(caller, OperationKind::Install, patterns).await,
            Call::Remove { patterns } => self.build(caller, OperationKind::Remove, patterns).await,
            Call::Update { patterns } => self.build(caller, OperationKind::Update, patterns).await,
            Call::Reinstall { patterns } => {
                self.build(caller, OperationKind::Reinstall, patterns).await
            },
            Call::Downgrade { patterns } => {
                self.build(caller, OperationKind::Downgrade, patterns).await
            },

            Call::AddTransaction { id, action } => {
                self.with_engine(caller, move |engine, ctx| {
                    TransactionBuilder::new(engine, &ctx.reporter)
                        .add_member(&id, &action)
                        .map(Reply::Strings)
                })
                .await
            },
            Call::ClearTransaction => {
                self.with_engine(caller, |engine, ctx| {
                    TransactionBuilder::new(engine, &ctx.reporter).clear();
                    Ok(Reply::Unit)
                })
                .await
            },
            Call::GetTransaction => {
                self.with_engine(caller, |engine, ctx| {
                    Ok(Reply::Strings(
                        TransactionBuilder::new(engine, &ctx.reporter).pending(),
                    ))
                })
                .await
            },
            Call::BuildTransaction => {
                self.with_engine(caller, |engine, ctx| {
                    json_reply(&TransactionBuilder::new(engine, &ctx.reporter).resolve())
                })
                .await
            },
            Call::RunTransaction => self.run_transaction(caller).await.map(|()| Reply::Unit),
        }
    }

    // =========================================================================
    // Session calls
    // =========================================================================

    async fn lock(&self, caller: &CallerIdentity) -> DaemonResult<bool> {
        self.privileged(caller, Access::Any, self.timeouts.call, |session, ctx| {
            session.acquire(&ctx.caller)
        })
        .await
    }

    async fn unlock(&self, caller: &CallerIdentity) -> DaemonResult<bool> {
        self.privileged(caller, Access::Any, self.timeouts.call, |session, ctx| {
            session.release(&ctx.caller)
        })
        .await
    }

    /// Ends the session and requests shutdown unless a commit is running.
    async fn exit(&self, caller: &CallerIdentity) -> DaemonResult<bool> {
        self.gate.check_permission(caller).await?;
        if !self.monitor.can_quit() {
            info!(caller = %caller, "Exit refused: commit in progress");
            return Ok(false);
        }

        let seconds = self.timeouts.call.as_secs();
        let mut session = tokio::time::timeout(self.timeouts.call, self.session.lock())
            .await
            .map_err(|_| DaemonError::Timeout { seconds })?;
        session.end_session();
        drop(session);

        info!(caller = %caller, "Exit requested");
        self.shutdown.request();
        Ok(true)
    }

    async fn build(
        &self,
        caller: &CallerIdentity,
        kind: OperationKind,
        patterns: String,
    ) -> DaemonResult<Reply> {
        self.with_engine(caller, move |engine, ctx| {
            json_reply(&TransactionBuilder::new(engine, &ctx.reporter).build(kind, &patterns))
        })
        .await
    }

    /// Commits the pending transaction. The session ends whatever the
    /// outcome.
    async fn run_transaction(&self, caller: &CallerIdentity) -> DaemonResult<()> {
        self.privileged(caller, Access::Holder, self.timeouts.run, |session, ctx| {
            let _inhibit = ctx.monitor.inhibit_quit();
            ctx.reporter.emit(TransactionPhase::StartRun);

            let result = {
                let mut scope = CommitScope(session);
                scope.0.open_engine().and_then(|engine| {
                    engine.apply().map_err(|e| DaemonError::TransactionFailed {
                        messages: e.into_messages(),
                    })
                })
            };

            match &result {
                Ok(()) => {
                    info!(caller = %ctx.caller, "Transaction committed");
                    ctx.reporter.emit(TransactionPhase::EndRun);
                },
                Err(e) => {
                    error!(caller = %ctx.caller, error = %e, "Transaction failed");
                    ctx.reporter.emit(TransactionPhase::Fail);
                },
            }
            result
        })
        .await
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Runs `work` against the holder's engine.
    async fn with_engine<F>(&self, caller: &CallerIdentity, work: F) -> DaemonResult<Reply>
    where
        F: FnOnce(&mut dyn PackageEngine, &WorkContext) -> DaemonResult<Reply> + Send + 'static,
    {
        self.privileged(caller, Access::Holder, self.timeouts.call, |session, ctx| {
            work(session.engine()?, ctx)
        })
        .await
    }

    /// Authorizes `caller`, then runs `work` on a blocking thread holding
    /// the session, bounded by `deadline`.
    async fn privileged<T, F>(
        &self,
        caller: &CallerIdentity,
        access: Access,
        deadline: Duration,
        work: F,
    ) -> DaemonResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionLock, &WorkContext) -> DaemonResult<T> + Send + 'static,
    {
        self.gate.check_permission(caller).await?;

        let session = Arc::clone(&self.session);
        let ctx = WorkContext {
            caller: caller.clone(),
            reporter: self.reporter.clone(),
            monitor: Arc::clone(&self.monitor),
        };

        let task = async move {
            let mut guard = session.lock_owned().await;
            if access == Access::Holder {
                guard.check(&ctx.caller)?;
            }
            let work_guard: WorkGuard = ctx.monitor.begin_work();

            tokio::task::spawn_blocking(move || {
                let _work = work_guard;
                work(&mut guard, &ctx)
            })
            .await
            .map_err(|e| DaemonError::Internal(format!("engine task failed: {e}")))?
        };

        let seconds = deadline.as_secs();
        tokio::time::timeout(deadline, task)
            .await
            .unwrap_or(Err(DaemonError::Timeout { seconds }))
    }

    // =========================================================================
    // Watchdog and shutdown
    // =========================================================================

    /// Runs one watchdog tick and carries out termination.
    ///
    /// Never waits for the session: a busy session counts as work in
    /// flight.
    pub fn watchdog_tick(&self, watchdog: &mut Watchdog) -> WatchdogPhase {
        let Ok(mut session) = self.session.try_lock() else {
            return watchdog.tick_busy();
        };

        let phase = watchdog.tick(session.is_locked());
        if phase == WatchdogPhase::Terminating {
            if self.monitor.can_quit() {
                if let Some(holder) = session.holder() {
                    info!(holder, "Watchdog reclaiming abandoned session");
                }
                session.end_session();
                info!(
                    idle_ticks = self.monitor.idle_ticks(),
                    "Watchdog timeout, shutting down"
                );
                self.shutdown.request();
            } else {
                debug!("Watchdog termination deferred: commit in progress");
            }
        }
        phase
    }

    /// Ticks `watchdog` at its period until shutdown is requested.
    pub async fn run_watchdog(self: Arc<Self>, mut watchdog: Watchdog) {
        let mut interval = tokio::time::interval(watchdog.period());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {},
                () = self.shutdown.wait() => break,
            }
            self.watchdog_tick(&mut watchdog);
            if self.shutdown.is_requested() {
                break;
            }
        }
        debug!("Watchdog stopped");
    }

    /// Ends any session at daemon exit. Waits for a call in flight to
    /// finish first.
    pub async fn shutdown_session(&self) {
        let mut session = self.session.lock().await;
        if session.end_session() {
            info!("Session ended at shutdown");
        }
    }
}

impl std::fmt::Debug for PackageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageService")
            .field("timeouts", &self.timeouts)
            .field("shutdown_requested", &self.shutdown.is_requested())
            .finish_non_exhaustive()
    }
}

/// Repository ids for a `GetRepositories` filter.
fn repository_ids(engine: &dyn PackageEngine, filter: &str) -> Vec<String> {
    engine
        .repositories()
        .into_iter()
        .filter(|repo| {
            if filter.is_empty() || filter == "enabled" {
                repo.enabled
            } else {
                glob_match(filter, &repo.id)
            }
        })
        .map(|repo| repo.id)
        .collect()
}

fn json_reply<T: Serialize>(value: &T) -> DaemonResult<Reply> {
    serde_json::to_value(value)
        .map(Reply::Json)
        .map_err(|e| DaemonError::Internal(format!("failed to encode reply: {e}")))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use pkgd_core::progress::Notification;
    use pkgd_core::{ReportCategory, ResolutionReport};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::auth::AuthorityError;
    use crate::engine::CatalogFactory;
    use crate::watchdog::WatchdogConfig;

    struct AllowAll;

    #[async_trait]
    impl AuthorizationAuthority for AllowAll {
        async fn check_authorization(&self, _caller: &CallerIdentity) -> Result<bool, AuthorityError> {
            Ok(true)
        }
    }

    fn write_catalog(dir: &Path) -> std::path::PathBuf {
        let catalog = json!({
            "config": {"skip_broken": false},
            "repositories": [
                {"id": "base", "enabled": true},
                {"id": "base-debug", "enabled": false},
                {"id": "updates", "enabled": true}
            ],
            "available": [
                {"name": "foo", "version": "1.0", "release": "1", "arch": "noarch", "repo": "base",
                 "summary": "Foo tool", "size": 1024, "requires": ["libfoo"]},
                {"name": "libfoo", "version": "1.0", "release": "1", "arch": "noarch", "repo": "base"}
            ],
            "installed": [
                {"name": "bar", "version": "2.0", "release": "1", "arch": "noarch", "repo": "base",
                 "summary": "Bar daemon"}
            ]
        });
        let path = dir.join("catalog.json");
        std::fs::write(&path, catalog.to_string()).unwrap();
        path
    }

    fn service(dir: &TempDir) -> PackageService {
        let catalog = write_catalog(dir.path());
        let factory = CatalogFactory::new(catalog, dir.path().join("catalog.lock"));
        PackageService::new(Arc::new(AllowAll), Arc::new(factory), ServiceTimeouts::default())
    }

    fn caller(n: u64) -> CallerIdentity {
        CallerIdentity::connection(n, None)
    }

    fn report(reply: Reply) -> ResolutionReport {
        match reply {
            Reply::Json(value) => serde_json::from_value(value).unwrap(),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_version_needs_no_session() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let reply = service.call(&caller(1), Call::GetVersion).await.unwrap();
        assert_eq!(reply, Reply::Int(100));
    }

    #[tokio::test]
    async fn test_queries_require_lock() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let err = service
            .call(&caller(1), Call::GetRepositories { filter: String::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Locked { holder: None }));
    }

    #[tokio::test]
    async fn test_repository_filters() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let me = caller(1);
        assert_eq!(service.call(&me, Call::Lock).await.unwrap(), Reply::Bool(true));

        let enabled = service
            .call(&me, Call::GetRepositories { filter: "enabled".into() })
            .await
            .unwrap();
        assert_eq!(enabled, Reply::Strings(vec!["base".into(), "updates".into()]));

        let globbed = service
            .call(&me, Call::GetRepositories { filter: "base*".into() })
            .await
            .unwrap();
        assert_eq!(globbed, Reply::Strings(vec!["base".into(), "base-debug".into()]));
    }

    #[tokio::test]
    async fn test_lookups() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let me = caller(1);
        service.call(&me, Call::Lock).await.unwrap();

        let missing = service
            .call(&me, Call::GetConfig { key: "no_such_key".into() })
            .await
            .unwrap();
        assert_eq!(missing, Reply::Json(serde_json::to_value(Lookup::<()>::NotFound).unwrap()));

        let summary = service
            .call(
                &me,
                Call::GetAttribute {
                    id: "foo,,1.0,1,noarch,base".into(),
                    attr: "summary".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            summary,
            Reply::Json(serde_json::to_value(Lookup::Found(json!("Foo tool"))).unwrap())
        );

        let unsupported = service
            .call(
                &me,
                Call::GetAttribute {
                    id: "foo,,1.0,1,noarch,base".into(),
                    attr: "__class__".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            unsupported,
            Reply::Json(serde_json::to_value(Lookup::<()>::Unsupported).unwrap())
        );

        let bad_id = service
            .call(
                &me,
                Call::GetAttribute {
                    id: "foo".into(),
                    attr: "summary".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(bad_id, DaemonError::InvalidRequest(_)));

        let narrow = service
            .call(&me, Call::GetPackages { narrow: "bogus".into() })
            .await
            .unwrap();
        assert_eq!(narrow, Reply::Strings(Vec::new()));
    }

    #[tokio::test]
    async fn test_attribute_of_repo_tagged_installed_id() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let me = caller(1);
        service.call(&me, Call::Lock).await.unwrap();

        let summary = |id: &str| Call::GetAttribute {
            id: id.into(),
            attr: "summary".into(),
        };
        let expected =
            Reply::Json(serde_json::to_value(Lookup::Found(json!("Bar daemon"))).unwrap());

        let tagged = service.call(&me, summary("bar,,2.0,1,noarch,@base")).await.unwrap();
        assert_eq!(tagged, expected);
        let installed = service
            .call(&me, summary("bar,,2.0,1,noarch,installed"))
            .await
            .unwrap();
        assert_eq!(installed, expected);

        // Only the installed set carries this build.
        let repo = service.call(&me, summary("bar,,2.0,1,noarch,base")).await.unwrap();
        assert_eq!(repo, Reply::Json(serde_json::to_value(Lookup::<()>::NotFound).unwrap()));
    }

    #[tokio::test]
    async fn test_install_build_run_ends_session() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let mut rx = service.reporter().subscribe();
        let me = caller(1);

        service.call(&me, Call::Lock).await.unwrap();
        let built = report(
            service
                .call(&me, Call::Install { patterns: "foo".into() })
                .await
                .unwrap(),
        );
        assert_eq!(built.code, pkgd_core::ResolveCode::Ok);
        assert_eq!(built.group(ReportCategory::Install).unwrap().len(), 1);
        assert_eq!(built.group(ReportCategory::InstallDeps).unwrap().len(), 1);

        service.call(&me, Call::RunTransaction).await.unwrap();
        assert_eq!(service.holder().await, None);
        assert!(!service.has_engine().await);
        assert!(service.monitor().can_quit());

        let err = service.call(&me, Call::GetTransaction).await.unwrap_err();
        assert!(matches!(err, DaemonError::Locked { .. }));

        let events: Vec<Notification> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&Notification::TransactionEvent {
            event: TransactionPhase::StartRun
        }));
        assert_eq!(
            events.last(),
            Some(&Notification::TransactionEvent {
                event: TransactionPhase::EndRun
            })
        );
    }

    #[tokio::test]
    async fn test_exit_ends_session_and_requests_shutdown() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service.call(&caller(1), Call::Lock).await.unwrap();

        let reply = service.call(&caller(2), Call::Exit).await.unwrap();
        assert_eq!(reply, Reply::Bool(true));
        assert!(service.shutdown_signal().is_requested());
        assert_eq!(service.holder().await, None);
    }

    #[tokio::test]
    async fn test_exit_refused_while_quit_inhibited() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let _inhibit = service.monitor().inhibit_quit();

        let reply = service.call(&caller(1), Call::Exit).await.unwrap();
        assert_eq!(reply, Reply::Bool(false));
        assert!(!service.shutdown_signal().is_requested());
    }

    #[tokio::test]
    async fn test_watchdog_reclaims_abandoned_session() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service.call(&caller(1), Call::Lock).await.unwrap();

        let config = WatchdogConfig {
            idle_threshold: 1,
            locked_threshold: 2,
            tick: Duration::from_millis(10),
        };
        let mut dog = Watchdog::new(config, Arc::clone(service.monitor()));
        assert_eq!(service.watchdog_tick(&mut dog), WatchdogPhase::Idle);
        assert_eq!(service.watchdog_tick(&mut dog), WatchdogPhase::Idle);
        assert_eq!(service.watchdog_tick(&mut dog), WatchdogPhase::Terminating);

        assert!(service.shutdown_signal().is_requested());
        assert_eq!(service.holder().await, None);
        assert!(!service.has_engine().await);
    }

    #[tokio::test]
    async fn test_watchdog_defers_while_quit_inhibited() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let config = WatchdogConfig {
            idle_threshold: 0,
            locked_threshold: 0,
            tick: Duration::from_millis(10),
        };
        let mut dog = Watchdog::new(config, Arc::clone(service.monitor()));

        let inhibit = service.monitor().inhibit_quit();
        assert_eq!(service.watchdog_tick(&mut dog), WatchdogPhase::Terminating);
        assert!(!service.shutdown_signal().is_requested());

        drop(inhibit);
        assert_eq!(service.watchdog_tick(&mut dog), WatchdogPhase::Terminating);
        assert!(service.shutdown_signal().is_requested());
    }
}
