//! Idle and abandoned-session watchdog.
//!
//! The daemon is started on demand and must not linger. Every tick the
//! watchdog samples the [`ActivityMonitor`]:
//!
//! - while an operation is in flight nothing advances;
//! - otherwise the idle counter advances, and once it passes the threshold
//!   for the current lock state the watchdog reports
//!   [`WatchdogPhase::Terminating`].
//!
//! The counter is incremented before the comparison, so with a threshold of
//! `n` the daemon terminates on idle tick `n + 1`. Termination itself is
//! carried out by [`crate::service::PackageService::watchdog_tick`], which
//! defers while a commit holds a [`QuitInhibitor`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use pkgd_core::config::WatchdogSection;
use tracing::debug;

// =============================================================================
// Activity
// =============================================================================

/// Shared activity flags sampled by the watchdog.
#[derive(Debug)]
pub struct ActivityMonitor {
    working: AtomicBool,
    idle_ticks: AtomicU64,
    can_quit: AtomicBool,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self {
            working: AtomicBool::new(false),
            idle_ticks: AtomicU64::new(0),
            can_quit: AtomicBool::new(true),
        }
    }
}

impl ActivityMonitor {
    /// Creates an idle monitor that allows quitting.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks an operation as in flight and resets the idle counter until the
    /// returned guard drops.
    #[must_use]
    pub fn begin_work(self: &Arc<Self>) -> WorkGuard {
        self.working.store(true, Ordering::SeqCst);
        self.idle_ticks.store(0, Ordering::SeqCst);
        WorkGuard {
            monitor: Arc::clone(self),
        }
    }

    /// Forbids process exit until the returned guard drops.
    #[must_use]
    pub fn inhibit_quit(self: &Arc<Self>) -> QuitInhibitor {
        self.can_quit.store(false, Ordering::SeqCst);
        QuitInhibitor {
            monitor: Arc::clone(self),
        }
    }

    /// Returns `true` while an operation is in flight.
    #[must_use]
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    /// Returns `true` unless a commit is running.
    #[must_use]
    pub fn can_quit(&self) -> bool {
        self.can_quit.load(Ordering::SeqCst)
    }

    /// Current idle counter.
    #[must_use]
    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::SeqCst)
    }

    /// Advances the idle counter and returns the new value.
    fn advance(&self) -> u64 {
        self.idle_ticks.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Clears the working flag on drop, on success and failure alike.
#[derive(Debug)]
pub struct WorkGuard {
    monitor: Arc<ActivityMonitor>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.monitor.working.store(false, Ordering::SeqCst);
    }
}

/// Restores `can_quit` on drop.
#[derive(Debug)]
pub struct QuitInhibitor {
    monitor: Arc<ActivityMonitor>,
}

impl Drop for QuitInhibitor {
    fn drop(&mut self) {
        self.monitor.can_quit.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Watchdog
// =============================================================================

/// Watchdog verdict for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogPhase {
    /// Nothing in flight; counter below threshold.
    Idle,
    /// An operation is in flight.
    Working,
    /// The idle counter passed its threshold.
    Terminating,
}

/// Watchdog thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Idle ticks tolerated while unlocked.
    pub idle_threshold: u64,
    /// Idle ticks tolerated while a session is locked.
    pub locked_threshold: u64,
    /// Tick period.
    pub tick: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::from(&WatchdogSection::default())
    }
}

impl From<&WatchdogSection> for WatchdogConfig {
    fn from(section: &WatchdogSection) -> Self {
        Self {
            idle_threshold: section.idle_timeout,
            locked_threshold: section.locked_timeout,
            tick: Duration::from_millis(section.tick_ms),
        }
    }
}

/// Tick-driven idle state machine.
#[derive(Debug)]
pub struct Watchdog {
    config: WatchdogConfig,
    monitor: Arc<ActivityMonitor>,
    phase: WatchdogPhase,
}

impl Watchdog {
    /// Creates a watchdog over `monitor`.
    #[must_use]
    pub const fn new(config: WatchdogConfig, monitor: Arc<ActivityMonitor>) -> Self {
        Self {
            config,
            monitor,
            phase: WatchdogPhase::Idle,
        }
    }

    /// Samples activity once. `locked` is the session lock state at this
    /// tick.
    pub fn tick(&mut self, locked: bool) -> WatchdogPhase {
        self.phase = if self.monitor.is_working() {
            WatchdogPhase::Working
        } else {
            let ticks = self.monitor.advance();
            let threshold = if locked {
                self.config.locked_threshold
            } else {
                self.config.idle_threshold
            };
            debug!(ticks, threshold, locked, "Watchdog tick");
            if ticks > threshold {
                WatchdogPhase::Terminating
            } else {
                WatchdogPhase::Idle
            }
        };
        self.phase
    }

    /// Counts a tick on which the session was busy.
    pub fn tick_busy(&mut self) -> WatchdogPhase {
        self.phase = WatchdogPhase::Working;
        self.phase
    }

    /// Tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.config.tick
    }

    /// The monitor this watchdog samples.
    #[must_use]
    pub const fn monitor(&self) -> &Arc<ActivityMonitor> {
        &self.monitor
    }
}
