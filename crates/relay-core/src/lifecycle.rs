//! Connection lifecycle: handshake, liveness, disconnect.

use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::connection::{Connection, TransportKind};
use crate::events::{SharedDispatcher, CONNECT, DISCONNECT};
use crate::rooms::{RoomError, RoomManager};
use crate::store::{SharedStore, StoreError};

/// Default liveness timeout.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Liveness faults. Each one is fatal to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusError {
    /// Transport binding missing or expired.
    #[error("Transport unavailable")]
    InvalidTransport,

    /// No ping has ever been recorded.
    #[error("Invalid session: no ping recorded")]
    InvalidPing,

    /// Neither pings nor deliveries are recent enough.
    #[error("Session expired: ping timeout")]
    PingTimeout,
}

impl StatusError {
    /// HTTP status code reported for this fault.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            StatusError::InvalidPing => 400,
            StatusError::PingTimeout => 410,
            StatusError::InvalidTransport => 500,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StatusError::InvalidTransport => "invalid_transport",
            StatusError::InvalidPing => "invalid_ping",
            StatusError::PingTimeout => "ping_timeout",
        }
    }
}

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Room membership update failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates, checks and tears down connections.
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    store: SharedStore,
    rooms: RoomManager,
    dispatcher: SharedDispatcher,
    clock: SharedClock,
}

impl ConnectionLifecycle {
    /// Create a lifecycle manager.
    #[must_use]
    pub fn new(
        store: SharedStore,
        rooms: RoomManager,
        dispatcher: SharedDispatcher,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            rooms,
            dispatcher,
            clock,
        }
    }

    /// Handle a handshake.
    ///
    /// The new connection counts as pinged, joins its direct room and is
    /// announced as `socket.connect`. A `ttl` bounds the transport binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn open(
        &self,
        kind: TransportKind,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Result<Connection, LifecycleError> {
        let now = self.clock.now_millis();
        let mut connection = Connection::new(kind, now).with_namespace(namespace);
        connection.touch_ping(now);
        if let (Some(binding), Some(ttl)) = (connection.transport.as_mut(), ttl) {
            binding.expires_at = Some(now.saturating_add(ttl.as_millis() as u64));
        }

        self.store.save_connection(&connection).await?;
        self.rooms
            .join_room(&connection, &connection.socket_id)
            .await?;

        self.dispatcher.dispatch(
            CONNECT,
            &connection,
            &json!({ "sid": connection.socket_id }),
        );

        info!(
            session = %connection.session_id,
            transport = %kind,
            namespace = %connection.namespace,
            "Connection opened"
        );
        Ok(connection)
    }

    /// Look up a connection by session id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn find(&self, session_id: &str) -> Result<Option<Connection>, StoreError> {
        self.store.find_by_session_id(session_id).await
    }

    /// Check that a connection is still alive.
    ///
    /// A stale ping is tolerated while deliveries keep flowing: the
    /// connection only times out once the ping is older than `timeout` and
    /// the last delivery is older than twice `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the liveness fault; the caller must disconnect.
    pub fn check_active(&self, connection: &Connection, timeout: Duration) -> Result<(), StatusError> {
        let now = self.clock.now_millis();

        match &connection.transport {
            Some(binding) if !binding.is_expired(now) => {}
            _ => return Err(StatusError::InvalidTransport),
        }

        let ping_age = connection.ping_age(now).ok_or(StatusError::InvalidPing)?;
        let timeout_ms = timeout.as_millis() as u64;
        if ping_age > timeout_ms && connection.deliver_age(now) > timeout_ms.saturating_mul(2) {
            return Err(StatusError::PingTimeout);
        }
        Ok(())
    }

    /// Disconnect a connection.
    ///
    /// Leaves every room, clears the connected flag and emits
    /// `socket.disconnect`. Safe to call on an already disconnected record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn disconnect(&self, connection: &mut Connection) -> Result<(), LifecycleError> {
        let was_connected = connection.connected;
        let left = self.rooms.leave_all_rooms(&connection.session_id).await?;

        connection.connected = false;
        self.store.save_connection(connection).await?;
        self.dispatcher
            .dispatch(DISCONNECT, connection, &json!({ "rooms": left }));

        debug!(session = %connection.session_id, was_connected, rooms = left, "Disconnected");
        Ok(())
    }

    /// Record an inbound ping or pong.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn record_ping(&self, connection: &mut Connection) -> Result<(), StoreError> {
        connection.touch_ping(self.clock.now_millis());
        self.store.save_connection(connection).await
    }

    /// The room manager.
    #[must_use]
    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::events::ChannelDispatcher;
    use crate::memory::MemoryStore;
    use std::sync::Arc;

    const TIMEOUT: Duration = DEFAULT_PING_TIMEOUT;

    fn lifecycle() -> (Arc<ManualClock>, ChannelDispatcher, ConnectionLifecycle) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
        let dispatcher = ChannelDispatcher::new(16);
        let lifecycle = ConnectionLifecycle::new(
            store.clone(),
            RoomManager::new(store),
            Arc::new(dispatcher.clone()),
            clock.clone(),
        );
        (clock, dispatcher, lifecycle)
    }

    #[tokio::test]
    async fn test_open() {
        let (_, dispatcher, lifecycle) = lifecycle();
        let mut rx = dispatcher.subscribe();

        let conn = lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();
        assert_eq!(conn.last_ping_time, Some(1_000_000));
        assert!(lifecycle.find(&conn.session_id).await.unwrap().is_some());

        let direct = lifecycle.rooms().members(&conn.direct_room()).await.unwrap();
        assert_eq!(direct, vec![conn.session_id.clone()]);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, CONNECT);
        assert_eq!(event.payload["sid"], conn.socket_id);
    }

    #[tokio::test]
    async fn test_check_active_faults() {
        let (clock, _, lifecycle) = lifecycle();
        let mut conn = lifecycle
            .open(TransportKind::Polling, "/", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(lifecycle.check_active(&conn, TIMEOUT), Ok(()));

        conn.last_ping_time = None;
        assert_eq!(
            lifecycle.check_active(&conn, TIMEOUT),
            Err(StatusError::InvalidPing)
        );

        clock.advance(Duration::from_secs(60));
        assert_eq!(
            lifecycle.check_active(&conn, TIMEOUT),
            Err(StatusError::InvalidTransport)
        );

        conn.transport = None;
        assert_eq!(
            lifecycle.check_active(&conn, TIMEOUT),
            Err(StatusError::InvalidTransport)
        );
    }

    #[tokio::test]
    async fn test_ping_timeout_needs_both_ages() {
        let (clock, _, lifecycle) = lifecycle();
        let mut conn = lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();

        // Stale ping, recent delivery
        clock.advance(Duration::from_secs(40));
        conn.record_delivery(clock.now_millis());
        clock.advance(Duration::from_secs(30));
        assert_eq!(lifecycle.check_active(&conn, TIMEOUT), Ok(()));

        // Deliver age exactly 2x timeout is still tolerated
        clock.advance(Duration::from_secs(30));
        assert_eq!(lifecycle.check_active(&conn, TIMEOUT), Ok(()));

        clock.advance(Duration::from_millis(1));
        assert_eq!(
            lifecycle.check_active(&conn, TIMEOUT),
            Err(StatusError::PingTimeout)
        );

        // A fresh ping alone is enough
        conn.touch_ping(clock.now_millis());
        assert_eq!(lifecycle.check_active(&conn, TIMEOUT), Ok(()));
    }

    #[tokio::test]
    async fn test_never_delivered_times_out_on_ping() {
        let (clock, _, lifecycle) = lifecycle();
        let conn = lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();

        clock.advance(TIMEOUT);
        assert_eq!(lifecycle.check_active(&conn, TIMEOUT), Ok(()));
        clock.advance(Duration::from_millis(1));
        assert_eq!(
            lifecycle.check_active(&conn, TIMEOUT),
            Err(StatusError::PingTimeout)
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (_, dispatcher, lifecycle) = lifecycle();
        let mut conn = lifecycle
            .open(TransportKind::Polling, "/", None)
            .await
            .unwrap();
        lifecycle.rooms().join_room(&conn, "lobby").await.unwrap();
        let mut rx = dispatcher.subscribe();

        lifecycle.disconnect(&mut conn).await.unwrap();
        lifecycle.disconnect(&mut conn).await.unwrap();

        assert!(!conn.connected);
        let stored = lifecycle.find(&conn.session_id).await.unwrap().unwrap();
        assert!(!stored.connected);
        assert!(lifecycle
            .rooms()
            .find_room("lobby", "/")
            .await
            .unwrap()
            .is_none());

        assert_eq!(rx.recv().await.unwrap().name, DISCONNECT);
        assert_eq!(rx.recv().await.unwrap().name, DISCONNECT);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StatusError::InvalidPing.status_code(), 400);
        assert_eq!(StatusError::PingTimeout.status_code(), 410);
        assert_eq!(StatusError::InvalidTransport.kind(), "invalid_transport");
        assert_eq!(StatusError::InvalidPing.kind(), "invalid_ping");
        assert_eq!(StatusError::PingTimeout.kind(), "ping_timeout");
        assert_eq!(StatusError::InvalidTransport.status_code(), 500);
    }
}
