//! Retention sweep for delivery records and stale connections.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::daemon::{run_daemon, SweepError};
use crate::queue::DeliveryQueue;
use crate::store::SharedStore;

/// Cleanup configuration.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Deliveries older than this many days are deleted.
    pub retention_days: u32,
    /// Disconnected records idle this long are deleted.
    pub inactive_connection: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention_days: 7,
            inactive_connection: Duration::from_secs(3600),
        }
    }
}

/// Outcome of one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deliveries_removed: usize,
    pub connections_removed: usize,
}

/// Periodic retention sweep.
#[derive(Debug, Clone)]
pub struct CleanupController {
    store: SharedStore,
    queue: Arc<DeliveryQueue>,
    config: CleanupConfig,
}

impl CleanupController {
    /// Create a controller.
    #[must_use]
    pub fn new(store: SharedStore, queue: Arc<DeliveryQueue>, config: CleanupConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Delete deliveries older than `retention_days` and idle disconnected
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn run_once(&self, retention_days: u32) -> Result<CleanupReport, SweepError> {
        let deliveries_removed = self.queue.cleanup_deliveries(retention_days).await?;
        let connections_removed = self
            .store
            .cleanup_inactive_connections(self.config.inactive_connection)
            .await?;

        info!(
            retention_days,
            deliveries_removed, connections_removed, "Cleanup"
        );
        Ok(CleanupReport {
            deliveries_removed,
            connections_removed,
        })
    }

    /// Sweep every interval until `token` is cancelled, handing each
    /// successful report to `on_report`.
    pub async fn run<R>(&self, token: CancellationToken, on_report: R) -> usize
    where
        R: Fn(&CleanupReport),
    {
        let days = self.config.retention_days;
        let on_report = &on_report;
        run_daemon("cleanup", self.config.interval, token, || async move {
            let report = self.run_once(days).await?;
            on_report(&report);
            Ok::<_, SweepError>(report)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{days_to_millis, ManualClock};
    use crate::connection::{Connection, TransportKind};
    use crate::delivery::Delivery;
    use crate::memory::MemoryStore;
    use crate::message::Message;
    use crate::queue::QueueConfig;
    use crate::store::Store;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_cleanup_removes_old_records() {
        let now = days_to_millis(10);
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let queue = Arc::new(DeliveryQueue::new(
            store.clone(),
            clock.clone(),
            QueueConfig::default(),
        ));
        let controller = CleanupController::new(store.clone(), queue, CleanupConfig::default());

        let message = Arc::new(Message::event("/", "chat", vec![], 0));
        let old = Delivery::new(message.clone(), "s1", days_to_millis(1));
        let recent = Delivery::new(message, "s1", days_to_millis(9));
        store.save_delivery(&old).await.unwrap();
        store.save_delivery(&recent).await.unwrap();

        let mut gone = Connection::new(TransportKind::Polling, 0);
        gone.connected = false;
        let live = Connection::new(TransportKind::Polling, 0);
        store.save_connection(&gone).await.unwrap();
        store.save_connection(&live).await.unwrap();

        let report = controller.run_once(7).await.unwrap();
        assert_eq!(
            report,
            CleanupReport {
                deliveries_removed: 1,
                connections_removed: 1
            }
        );
        assert_eq!(store.find_pending_deliveries("s1").await.unwrap().len(), 1);
        assert!(store.find_by_session_id(&live.session_id).await.unwrap().is_some());

        let report = controller.run_once(0).await.unwrap();
        assert_eq!(report.deliveries_removed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancelled() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let queue = Arc::new(DeliveryQueue::new(store.clone(), clock, QueueConfig::default()));
        let controller = CleanupController::new(store, queue, CleanupConfig::default());
        let token = CancellationToken::new();

        let reports = Arc::new(AtomicUsize::new(0));

        let handle = {
            let token = token.clone();
            let reports = reports.clone();
            tokio::spawn(async move {
                controller
                    .run(token, move |_: &CleanupReport| {
                        reports.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(3600 + 1800)).await;
        token.cancel();

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(reports.load(Ordering::SeqCst), 2);
    }
}
