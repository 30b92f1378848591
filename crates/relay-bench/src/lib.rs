//! Shared fixtures for the Relay benchmarks.

use async_trait::async_trait;
use relay_protocol::SocketPacket;
use std::sync::Arc;
use tenvis_relay_core::{
    Connection, ConnectionLifecycle, DeliveryQueue, LifecycleError, MessageBroadcaster, MemoryStore,
    NoopDispatcher, QueueConfig, RoomManager, SharedClock, SharedDispatcher, SharedStore,
    SystemClock, TransportKind,
};
use tenvis_relay_transport::{
    PacketHandler, PollingConfig, PollingTransport, TransportContext, TransportError,
};

/// Handler that accepts and drops every packet.
#[derive(Debug, Default)]
pub struct DiscardHandler;

#[async_trait]
impl PacketHandler for DiscardHandler {
    async fn handle(
        &self,
        _connection: &mut Connection,
        _packet: SocketPacket,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// An in-memory engine wired the way the server wires it.
#[derive(Debug, Clone)]
pub struct Engine {
    pub store: SharedStore,
    pub clock: SharedClock,
    pub lifecycle: ConnectionLifecycle,
    pub queue: Arc<DeliveryQueue>,
    pub broadcaster: MessageBroadcaster,
}

impl Engine {
    /// Build an engine with the given queue settings.
    #[must_use]
    pub fn new(queue: QueueConfig) -> Self {
        let clock: SharedClock = Arc::new(SystemClock);
        let store: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
        let dispatcher: SharedDispatcher = Arc::new(NoopDispatcher);

        Self {
            lifecycle: ConnectionLifecycle::new(
                store.clone(),
                RoomManager::new(store.clone()),
                dispatcher.clone(),
                clock.clone(),
            ),
            queue: Arc::new(DeliveryQueue::new(store.clone(), clock.clone(), queue)),
            broadcaster: MessageBroadcaster::new(store.clone(), dispatcher, clock.clone()),
            store,
            clock,
        }
    }

    /// Open `count` connections, all joined to `room`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn connect(&self, count: usize, room: &str) -> Result<Vec<Connection>, LifecycleError> {
        let mut connections = Vec::with_capacity(count);
        for _ in 0..count {
            let connection = self
                .lifecycle
                .open(TransportKind::Polling, "/", None)
                .await?;
            self.lifecycle
                .rooms()
                .join_room(&connection, room)
                .await?;
            connections.push(connection);
        }
        Ok(connections)
    }

    /// A polling transport over this engine.
    #[must_use]
    pub fn polling(&self, config: PollingConfig) -> PollingTransport {
        PollingTransport::new(TransportContext {
            store: self.store.clone(),
            queue: self.queue.clone(),
            lifecycle: self.lifecycle.clone(),
            handler: Arc::new(DiscardHandler),
            clock: self.clock.clone(),
            config,
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
