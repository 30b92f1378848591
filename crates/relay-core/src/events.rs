//! Lifecycle and application event dispatch.
//!
//! The engine reports `socket.connect`, `socket.disconnect` and every
//! application event it routes to an [`EventDispatcher`]. Hosts either plug
//! in their own dispatcher or subscribe to a [`ChannelDispatcher`].

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::connection::Connection;

/// Emitted after a handshake.
pub const CONNECT: &str = "socket.connect";

/// Emitted on every disconnect, including repeated ones.
pub const DISCONNECT: &str = "socket.disconnect";

/// Receives `(event, connection, payload)` triples.
pub trait EventDispatcher: Send + Sync + fmt::Debug {
    /// Dispatch one event.
    fn dispatch(&self, event: &str, connection: &Connection, payload: &Value);
}

/// Shared dispatcher handle.
pub type SharedDispatcher = Arc<dyn EventDispatcher>;

/// Dispatcher that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

impl EventDispatcher for NoopDispatcher {
    fn dispatch(&self, _event: &str, _connection: &Connection, _payload: &Value) {}
}

/// An event as seen by channel subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocketEvent {
    /// Event name.
    pub name: String,
    /// Session the event concerns.
    pub session_id: String,
    /// Namespace of the session.
    pub namespace: String,
    /// Event payload.
    pub payload: Value,
}

/// Dispatcher backed by a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than blocking the
/// engine.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: broadcast::Sender<SocketEvent>,
}

impl ChannelDispatcher {
    /// Create a dispatcher buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events dispatched from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, event: &str, connection: &Connection, payload: &Value) {
        let event = SocketEvent {
            name: event.to_string(),
            session_id: connection.session_id.clone(),
            namespace: connection.namespace.clone(),
            payload: payload.clone(),
        };
        // No subscribers is not an error
        let receivers = self.sender.send(event).unwrap_or(0);
        trace!(session = %connection.session_id, receivers, "Dispatched event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TransportKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_dispatch() {
        let dispatcher = ChannelDispatcher::new(8);
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);

        let conn = Connection::new(TransportKind::Polling, 0);
        dispatcher.dispatch(CONNECT, &conn, &json!({"sid": conn.socket_id}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, CONNECT);
        assert_eq!(event.session_id, conn.session_id);
        assert_eq!(event.namespace, "/");
    }

    #[test]
    fn test_dispatch_without_subscribers() {
        let dispatcher = ChannelDispatcher::new(8);
        let conn = Connection::new(TransportKind::Polling, 0);
        dispatcher.dispatch(DISCONNECT, &conn, &Value::Null);
        NoopDispatcher.dispatch(DISCONNECT, &conn, &Value::Null);
    }
}
