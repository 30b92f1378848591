//! Connection records.
//!
//! A connection is created by the Engine.IO handshake and updated by every
//! poll, delivery, and liveness check. Rooms own membership; a connection
//! holds no back-references and is found by its session id.

use relay_protocol::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::room::RoomKey;

/// Transport a connection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum TransportKind {
    /// HTTP long-polling.
    Polling,
}

impl TransportKind {
    /// Name used in the `transport` query parameter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polling" => Ok(TransportKind::Polling),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// The transport a connection is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportBinding {
    /// Transport kind.
    pub kind: TransportKind,
    /// Expiry in epoch milliseconds, if the binding is time-limited.
    pub expires_at: Option<u64>,
}

impl TransportBinding {
    /// Create a binding that never expires.
    #[must_use]
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            expires_at: None,
        }
    }

    /// Whether the binding has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Engine.IO session id (`sid`), stable for the life of the connection.
    pub session_id: String,
    /// Socket.IO socket id.
    pub socket_id: String,
    /// Application-level identity, if the host assigned one.
    pub client_id: Option<String>,
    /// Socket.IO namespace.
    pub namespace: String,
    /// Current transport binding.
    pub transport: Option<TransportBinding>,
    /// Whether the connection is live.
    pub connected: bool,
    /// Last ping seen or sent, epoch milliseconds.
    pub last_ping_time: Option<u64>,
    /// Last activity of any kind, epoch milliseconds.
    pub last_active_time: u64,
    /// Last successful delivery, epoch milliseconds.
    pub last_deliver_time: Option<u64>,
    /// Number of polls served.
    pub poll_count: u64,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
}

impl Connection {
    /// Create a connected record bound to `kind` on the default namespace.
    ///
    /// No ping has been recorded yet.
    #[must_use]
    pub fn new(kind: TransportKind, now: u64) -> Self {
        Self {
            session_id: Uuid::new_v4().simple().to_string(),
            socket_id: Uuid::new_v4().simple().to_string(),
            client_id: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            transport: Some(TransportBinding::new(kind)),
            connected: true,
            last_ping_time: None,
            last_active_time: now,
            last_deliver_time: None,
            poll_count: 0,
            created_at: now,
        }
    }

    /// Set the application-level identity.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// The room addressed only to this socket.
    #[must_use]
    pub fn direct_room(&self) -> RoomKey {
        RoomKey::new(&self.socket_id, &self.namespace)
    }

    /// Record a ping; counts as activity.
    pub fn touch_ping(&mut self, now: u64) {
        self.last_ping_time = Some(now);
        self.last_active_time = now;
    }

    /// Record activity.
    pub fn touch_active(&mut self, now: u64) {
        self.last_active_time = now;
    }

    /// Record a served poll.
    pub fn record_poll(&mut self, now: u64) {
        self.poll_count += 1;
        self.last_active_time = now;
    }

    /// Record a successful delivery.
    pub fn record_delivery(&mut self, now: u64) {
        self.last_deliver_time = Some(now);
    }

    /// Milliseconds since the last ping, `None` if never pinged.
    #[must_use]
    pub fn ping_age(&self, now: u64) -> Option<u64> {
        self.last_ping_time.map(|t| now.saturating_sub(t))
    }

    /// Milliseconds since the last delivery. A connection that never
    /// received anything is infinitely stale.
    #[must_use]
    pub fn deliver_age(&self, now: u64) -> u64 {
        self.last_deliver_time
            .map_or(u64::MAX, |t| now.saturating_sub(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection() {
        let conn = Connection::new(TransportKind::Polling, 1_000);
        assert!(conn.connected);
        assert_eq!(conn.namespace, "/");
        assert!(conn.last_ping_time.is_none());
        assert_ne!(conn.session_id, conn.socket_id);
        assert_eq!(conn.transport.unwrap().kind, TransportKind::Polling);
    }

    #[test]
    fn test_unique_session_ids() {
        let a = Connection::new(TransportKind::Polling, 0);
        let b = Connection::new(TransportKind::Polling, 0);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_ages() {
        let mut conn = Connection::new(TransportKind::Polling, 0);
        assert_eq!(conn.ping_age(500), None);
        assert_eq!(conn.deliver_age(500), u64::MAX);

        conn.touch_ping(100);
        conn.record_delivery(200);
        assert_eq!(conn.ping_age(500), Some(400));
        assert_eq!(conn.deliver_age(500), 300);
        assert_eq!(conn.last_active_time, 100);
    }

    #[test]
    fn test_binding_expiry() {
        let mut binding = TransportBinding::new(TransportKind::Polling);
        assert!(!binding.is_expired(u64::MAX));

        binding.expires_at = Some(1_000);
        assert!(!binding.is_expired(999));
        assert!(binding.is_expired(1_000));
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("polling".parse::<TransportKind>(), Ok(TransportKind::Polling));
        assert!("websocket".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Polling.to_string(), "polling");
    }

    #[test]
    fn test_direct_room() {
        let conn = Connection::new(TransportKind::Polling, 0).with_namespace("/chat");
        let room = conn.direct_room();
        assert_eq!(room.name, conn.socket_id);
        assert_eq!(room.namespace, "/chat");
    }
}
