//! Exclusive session lock.
//!
//! One caller at a time owns the package session. Locking opens the engine;
//! every way out of the session (unlock, exit, commit, watchdog, shutdown)
//! closes it again through [`SessionLock::end_session`].

use chrono::{DateTime, Utc};
use tracing::info;

use crate::auth::CallerIdentity;
use crate::engine::{EngineLifecycle, PackageEngine};
use crate::error::{DaemonError, DaemonResult};

/// Who holds the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No session.
    Unlocked,
    /// Held by a caller.
    LockedBy {
        /// Holder name.
        caller: String,
        /// When the lock was taken.
        since: DateTime<Utc>,
    },
}

/// Session lock together with the engine it guards.
#[derive(Debug)]
pub struct SessionLock {
    state: LockState,
    engine: EngineLifecycle,
}

impl SessionLock {
    /// Creates an unlocked session.
    #[must_use]
    pub const fn new(engine: EngineLifecycle) -> Self {
        Self {
            state: LockState::Unlocked,
            engine,
        }
    }

    /// Takes the lock for `caller` and opens the engine.
    ///
    /// Returns `Ok(false)` without touching the engine when anyone,
    /// including `caller`, already holds the lock.
    pub fn acquire(&mut self, caller: &CallerIdentity) -> DaemonResult<bool> {
        if let Some(holder) = self.holder() {
            info!(caller = %caller, holder, "Session already locked");
            return Ok(false);
        }

        self.engine.ensure()?;
        self.state = LockState::LockedBy {
            caller: caller.name().to_string(),
            since: Utc::now(),
        };
        info!(caller = %caller, "Session locked");
        Ok(true)
    }

    /// Fails with [`DaemonError::Locked`] unless `caller` holds the lock.
    pub fn check(&self, caller: &CallerIdentity) -> DaemonResult<()> {
        match self.holder() {
            Some(holder) if holder == caller.name() => Ok(()),
            holder => Err(DaemonError::Locked {
                holder: holder.map(str::to_string),
            }),
        }
    }

    /// Releases the lock held by `caller`.
    pub fn release(&mut self, caller: &CallerIdentity) -> DaemonResult<bool> {
        self.check(caller)?;
        self.end_session();
        info!(caller = %caller, "Session unlocked");
        Ok(true)
    }

    /// Tears the session down regardless of holder. Returns `true` if an
    /// engine was closed.
    pub fn end_session(&mut self) -> bool {
        self.state = LockState::Unlocked;
        self.engine.teardown()
    }

    /// The holder's engine, opened on first use.
    pub fn engine(&mut self) -> DaemonResult<&mut dyn PackageEngine> {
        self.engine.ensure()
    }

    /// The engine already open for this session. Never opens one, so a
    /// commit cannot run against an engine created after teardown.
    pub fn open_engine(&mut self) -> DaemonResult<&mut dyn PackageEngine> {
        self.engine
            .get()
            .ok_or_else(|| DaemonError::Internal("no engine open for the session".to_string()))
    }

    /// Current holder name.
    #[must_use]
    pub fn holder(&self) -> Option<&str> {
        match &self.state {
            LockState::Unlocked => None,
            LockState::LockedBy { caller, .. } => Some(caller),
        }
    }

    /// Returns `true` while the session is held.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self.state, LockState::LockedBy { .. })
    }

    /// Current lock state.
    #[must_use]
    pub const fn state(&self) -> &LockState {
        &self.state
    }

    /// Returns `true` while the engine is open.
    #[must_use]
    pub const fn has_engine(&self) -> bool {
        self.engine.is_active()
    }
}
