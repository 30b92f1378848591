//! Heartbeat sweep.
//!
//! Each sweep disconnects dead connections, runs queue cleanup and then
//! broadcasts two heartbeat events to everything still connected.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::MessageBroadcaster;
use crate::clock::SharedClock;
use crate::daemon::{run_daemon, SweepError};
use crate::lifecycle::{ConnectionLifecycle, StatusError, DEFAULT_PING_TIMEOUT};
use crate::queue::DeliveryQueue;
use crate::store::SharedStore;

/// Event carrying the sweep timestamp.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Event carrying two random nonces.
pub const NONCE_EVENT: &str = "heartbeat.nonce";

/// Heartbeat configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Liveness timeout passed to the connection check.
    pub ping_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

/// Outcome of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Connections checked.
    pub checked: usize,
    /// Connections disconnected for failing the check.
    pub disconnected: usize,
    /// Disconnects for a missing or expired transport binding.
    pub invalid_transports: usize,
    /// Disconnects for a session that never recorded a ping.
    pub invalid_pings: usize,
    /// Disconnects for a ping timeout.
    pub ping_timeouts: usize,
    /// In-memory queue entries evicted.
    pub queue_evicted: usize,
    /// Expired deliveries deleted.
    pub deliveries_removed: usize,
    /// Expired messages deleted.
    pub messages_removed: usize,
    /// Connections the heartbeat event reached.
    pub reached: usize,
}

impl HeartbeatReport {
    fn record_fault(&mut self, fault: StatusError) {
        self.disconnected += 1;
        match fault {
            StatusError::InvalidTransport => self.invalid_transports += 1,
            StatusError::InvalidPing => self.invalid_pings += 1,
            StatusError::PingTimeout => self.ping_timeouts += 1,
        }
    }

    /// Disconnect counts per liveness fault.
    #[must_use]
    pub fn faults(&self) -> [(StatusError, usize); 3] {
        [
            (StatusError::InvalidTransport, self.invalid_transports),
            (StatusError::InvalidPing, self.invalid_pings),
            (StatusError::PingTimeout, self.ping_timeouts),
        ]
    }
}

/// Periodic liveness sweep.
#[derive(Debug, Clone)]
pub struct HeartbeatController {
    store: SharedStore,
    lifecycle: ConnectionLifecycle,
    queue: Arc<DeliveryQueue>,
    broadcaster: MessageBroadcaster,
    clock: SharedClock,
    config: HeartbeatConfig,
}

impl HeartbeatController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        store: SharedStore,
        lifecycle: ConnectionLifecycle,
        queue: Arc<DeliveryQueue>,
        broadcaster: MessageBroadcaster,
        clock: SharedClock,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            store,
            lifecycle,
            queue,
            broadcaster,
            clock,
            config,
        }
    }

    /// Run a single sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn run_once(&self) -> Result<HeartbeatReport, SweepError> {
        let mut report = HeartbeatReport::default();

        for mut connection in self.store.find_active_connections(None).await? {
            report.checked += 1;
            if let Err(fault) = self
                .lifecycle
                .check_active(&connection, self.config.ping_timeout)
            {
                warn!(session = %connection.session_id, error = %fault, "Connection failed liveness check");
                self.lifecycle.disconnect(&mut connection).await?;
                report.record_fault(fault);
            }
        }

        let cleanup = self.queue.cleanup_queues().await?;
        report.queue_evicted = cleanup.evicted;
        report.deliveries_removed = cleanup.deliveries_removed;
        report.messages_removed = cleanup.messages_removed;

        let timestamp = self.clock.now_millis();
        report.reached = self
            .broadcaster
            .broadcast(HEARTBEAT_EVENT, vec![json!(timestamp)], None)
            .await?;
        let nonces = vec![json!(rand::random::<u32>()), json!(rand::random::<u32>())];
        self.broadcaster.broadcast(NONCE_EVENT, nonces, None).await?;

        info!(
            checked = report.checked,
            disconnected = report.disconnected,
            reached = report.reached,
            "Heartbeat"
        );
        Ok(report)
    }

    /// Sweep every interval until `token` is cancelled, handing each
    /// successful report to `on_report`.
    pub async fn run<R>(&self, token: CancellationToken, on_report: R) -> usize
    where
        R: Fn(&HeartbeatReport),
    {
        let on_report = &on_report;
        run_daemon("heartbeat", self.config.interval, token, || async move {
            let report = self.run_once().await?;
            on_report(&report);
            Ok::<_, SweepError>(report)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connection::TransportKind;
    use crate::events::NoopDispatcher;
    use crate::memory::MemoryStore;
    use crate::queue::QueueConfig;
    use crate::rooms::RoomManager;
    use crate::store::Store;
    use std::sync::Mutex;

    fn controller() -> (Arc<ManualClock>, SharedStore, HeartbeatController) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
        let dispatcher = Arc::new(NoopDispatcher);
        let lifecycle = ConnectionLifecycle::new(
            store.clone(),
            RoomManager::new(store.clone()),
            dispatcher.clone(),
            clock.clone(),
        );
        let queue = Arc::new(DeliveryQueue::new(
            store.clone(),
            clock.clone(),
            QueueConfig::default(),
        ));
        let broadcaster = MessageBroadcaster::new(store.clone(), dispatcher, clock.clone());
        let controller = HeartbeatController::new(
            store.clone(),
            lifecycle,
            queue,
            broadcaster,
            clock.clone(),
            HeartbeatConfig::default(),
        );
        (clock, store, controller)
    }

    #[tokio::test]
    async fn test_sweep_disconnects_dead_and_pings_live() {
        let (clock, store, controller) = controller();
        let stale = controller
            .lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(31));
        let live = controller
            .lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();

        let report = controller.run_once().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.disconnected, 1);
        assert_eq!(report.reached, 1);

        let stale = store.find_by_session_id(&stale.session_id).await.unwrap().unwrap();
        assert!(!stale.connected);
        assert!(store.find_pending_deliveries(&stale.session_id).await.unwrap().is_empty());

        let pending = store.find_pending_deliveries(&live.session_id).await.unwrap();
        let events: Vec<&str> = pending.iter().map(|d| d.message.event.as_str()).collect();
        assert_eq!(events, vec![HEARTBEAT_EVENT, NONCE_EVENT]);
        assert_eq!(pending[1].message.args.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_counts_each_fault() {
        let (clock, store, controller) = controller();
        let timed_out = controller
            .lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(31));

        let mut unbound = controller
            .lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();
        unbound.transport = None;
        store.save_connection(&unbound).await.unwrap();

        let mut never_pinged = controller
            .lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();
        never_pinged.last_ping_time = None;
        store.save_connection(&never_pinged).await.unwrap();

        let report = controller.run_once().await.unwrap();
        assert_eq!(report.disconnected, 3);
        assert_eq!(
            report.faults(),
            [
                (StatusError::InvalidTransport, 1),
                (StatusError::InvalidPing, 1),
                (StatusError::PingTimeout, 1),
            ]
        );
        let timed_out = store.find_by_session_id(&timed_out.session_id).await.unwrap().unwrap();
        assert!(!timed_out.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancelled() {
        let (_, _, controller) = controller();
        let token = CancellationToken::new();

        let reports = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let controller = controller.clone();
            let token = token.clone();
            let reports = reports.clone();
            tokio::spawn(async move {
                controller
                    .run(token, move |report: &HeartbeatReport| {
                        reports.lock().unwrap().push(*report);
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(95)).await;
        token.cancel();

        let sweeps = handle.await.unwrap();
        assert_eq!(sweeps, 4);
        assert_eq!(reports.lock().unwrap().len(), 4);
    }
}
