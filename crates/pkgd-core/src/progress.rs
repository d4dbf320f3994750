//! Outward progress notifications.
//!
//! The engine reports progress through the [`ProgressSink`] capability it is
//! given at construction; the daemon's reporter turns each call into a
//! [`Notification`] and broadcasts it to subscribed clients. Delivery is
//! best effort: no acknowledgement, no retry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase markers emitted around and during a build/commit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionPhase {
    /// Dependency resolution started.
    StartBuild,
    /// Dependency resolution finished (either outcome).
    EndBuild,
    /// Commit started.
    StartRun,
    /// Commit finished successfully.
    EndRun,
    /// Commit failed.
    Fail,
    /// Packages are being downloaded.
    Download,
    /// Package signatures are being checked.
    SignatureCheck,
    /// The test transaction is running.
    TestTransaction,
    /// The transaction is being applied.
    Apply,
}

impl TransactionPhase {
    /// Returns the wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartBuild => "start-build",
            Self::EndBuild => "end-build",
            Self::StartRun => "start-run",
            Self::EndRun => "end-run",
            Self::Fail => "fail",
            Self::Download => "download",
            Self::SignatureCheck => "signature-check",
            Self::TestTransaction => "test-transaction",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-package action names reported while applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyAction {
    /// Package being updated.
    Update,
    /// Package being erased.
    Erase,
    /// Package being installed.
    Install,
    /// Package being obsoleted.
    Obsolete,
    /// Old version cleaned up after an update.
    Cleanup,
    /// Package being repackaged.
    Repackage,
}

impl ApplyAction {
    /// Returns the wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Erase => "erase",
            Self::Install => "install",
            Self::Obsolete => "obsolete",
            Self::Cleanup => "cleanup",
            Self::Repackage => "repackage",
        }
    }
}

/// Download progress for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// File name.
    pub name: String,
    /// Completed fraction, `0.0..=1.0`.
    pub frac: f64,
    /// Bytes read so far, human readable.
    pub fread: String,
    /// Remaining or elapsed time, human readable.
    pub ftime: String,
}

/// Per-package apply progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyProgress {
    /// Package id string, or a bare package name when the engine has no id.
    pub package: String,
    /// Action name.
    pub action: ApplyAction,
    /// Bytes processed in the current element.
    pub te_current: u64,
    /// Total bytes of the current element.
    pub te_total: u64,
    /// Elements completed in the whole transaction.
    pub ts_current: u64,
    /// Elements in the whole transaction.
    pub ts_total: u64,
}

/// A notification broadcast to subscribed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum Notification {
    /// Download progress.
    DownloadProgress(DownloadProgress),
    /// Phase transition.
    TransactionEvent {
        /// The phase entered.
        event: TransactionPhase,
    },
    /// Apply progress.
    RpmProgress(ApplyProgress),
}

/// Capability the engine reports progress through.
///
/// Implementations must not block and must not fail: a dropped notification
/// is never an error for the engine.
pub trait ProgressSink: Send + Sync {
    /// Reports download progress.
    fn download_progress(&self, progress: DownloadProgress);

    /// Reports a phase transition.
    fn transaction_event(&self, phase: TransactionPhase);

    /// Reports per-package apply progress.
    fn rpm_progress(&self, progress: ApplyProgress);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let event = Notification::TransactionEvent {
            event: TransactionPhase::SignatureCheck,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["signal"], "transaction-event");
        assert_eq!(json["event"], "signature-check");

        let rpm = Notification::RpmProgress(ApplyProgress {
            package: "foo".to_string(),
            action: ApplyAction::Cleanup,
            te_current: 1,
            te_total: 2,
            ts_current: 3,
            ts_total: 4,
        });
        let json = serde_json::to_value(&rpm).unwrap();
        assert_eq!(json["signal"], "rpm-progress");
        assert_eq!(json["action"], "cleanup");
        assert_eq!(json["ts_total"], 4);
    }

    #[test]
    fn test_phase_names_match_serde() {
        for phase in [
            TransactionPhase::StartBuild,
            TransactionPhase::EndBuild,
            TransactionPhase::StartRun,
            TransactionPhase::EndRun,
            TransactionPhase::Fail,
            TransactionPhase::Download,
            TransactionPhase::SignatureCheck,
            TransactionPhase::TestTransaction,
            TransactionPhase::Apply,
        ] {
            let json = serde_json::to_value(phase).unwrap();
            assert_eq!(json, phase.as_str());
        }
    }
}
