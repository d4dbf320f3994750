//! Progress relay.
//!
//! [`ProgressReporter`] is the [`ProgressSink`] handed to the engine. It
//! publishes every notification on a broadcast channel; each subscribed
//! connection forwards them as signal frames. Nobody listening is not an
//! error.

use pkgd_core::progress::{
    ApplyProgress, DownloadProgress, Notification, ProgressSink, TransactionPhase,
};
use tokio::sync::broadcast;
use tracing::trace;

/// Notifications buffered per subscriber before the slowest one lags.
pub const NOTIFICATION_CAPACITY: usize = 1024;

/// Broadcasts engine progress to subscribers.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: broadcast::Sender<Notification>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(NOTIFICATION_CAPACITY)
    }
}

impl ProgressReporter {
    /// Creates a reporter buffering `capacity` notifications per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Starts receiving notifications published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publishes a notification, best effort.
    pub fn publish(&self, notification: Notification) {
        if let Err(broadcast::error::SendError(dropped)) = self.sender.send(notification) {
            trace!(notification = ?dropped, "No subscribers for notification");
        }
    }

    /// Publishes a phase transition.
    pub fn emit(&self, phase: TransactionPhase) {
        self.publish(Notification::TransactionEvent { event: phase });
    }
}

impl ProgressSink for ProgressReporter {
    fn download_progress(&self, mut progress: DownloadProgress) {
        progress.frac = progress.frac.clamp(0.0, 1.0);
        self.publish(Notification::DownloadProgress(progress));
    }

    fn transaction_event(&self, phase: TransactionPhase) {
        self.emit(phase);
    }

    fn rpm_progress(&self, progress: ApplyProgress) {
        self.publish(Notification::RpmProgress(progress));
    }
}

#[cfg(test)]
mod tests {
    use pkgd_core::progress::ApplyAction;

    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let reporter = ProgressReporter::default();
        reporter.emit(TransactionPhase::StartBuild);
    }

    #[test]
    fn test_subscriber_receives_in_order() {
        let reporter = ProgressReporter::default();
        let mut rx = reporter.subscribe();

        reporter.emit(TransactionPhase::StartRun);
        reporter.rpm_progress(ApplyProgress {
            package: "foo".to_string(),
            action: ApplyAction::Install,
            te_current: 1,
            te_total: 1,
            ts_current: 1,
            ts_total: 1,
        });
        reporter.emit(TransactionPhase::EndRun);

        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::TransactionEvent {
                event: TransactionPhase::StartRun
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), Notification::RpmProgress(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::TransactionEvent {
                event: TransactionPhase::EndRun
            }
        );
    }

    #[test]
    fn test_download_fraction_is_clamped() {
        let reporter = ProgressReporter::default();
        let mut rx = reporter.subscribe();
        reporter.download_progress(DownloadProgress {
            name: "foo.rpm".to_string(),
            frac: 1.7,
            fread: "2.0 k".to_string(),
            ftime: "00:01".to_string(),
        });
        match rx.try_recv().unwrap() {
            Notification::DownloadProgress(progress) => assert!((progress.frac - 1.0).abs() < f64::EPSILON),
            other => panic!("unexpected notification: {other:?}"),
        }
    }
}
