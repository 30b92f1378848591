//! Default handling of inbound Socket.IO packets.

use async_trait::async_trait;
use relay_protocol::{SocketPacket, SocketPacketType};
use serde_json::{json, Value};
use std::sync::Arc;
use tenvis_relay_core::{
    Connection, ConnectionLifecycle, DeliveryQueue, MessageBroadcaster, SharedDispatcher,
    SharedStore,
};
use tenvis_relay_transport::{PacketHandler, TransportError};
use tracing::{debug, trace};

use crate::metrics;

/// Event that joins the room named by its first argument.
pub const JOIN_EVENT: &str = "join";

/// Event that leaves the room named by its first argument.
pub const LEAVE_EVENT: &str = "leave";

/// Routes client packets into rooms, the queue and the event dispatcher.
#[derive(Debug, Clone)]
pub struct SocketHandler {
    store: SharedStore,
    lifecycle: ConnectionLifecycle,
    queue: Arc<DeliveryQueue>,
    broadcaster: MessageBroadcaster,
    dispatcher: SharedDispatcher,
}

impl SocketHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(
        store: SharedStore,
        lifecycle: ConnectionLifecycle,
        queue: Arc<DeliveryQueue>,
        broadcaster: MessageBroadcaster,
        dispatcher: SharedDispatcher,
    ) -> Self {
        Self {
            store,
            lifecycle,
            queue,
            broadcaster,
            dispatcher,
        }
    }

    /// Answer a namespace CONNECT with the socket id.
    async fn on_connect(
        &self,
        connection: &mut Connection,
        packet: SocketPacket,
    ) -> Result<(), TransportError> {
        let rooms = self.lifecycle.rooms();
        if connection.namespace != packet.namespace {
            rooms
                .leave_room(connection, &connection.socket_id)
                .await
                .map_err(handler_error)?;
            connection.namespace = packet.namespace.clone();
            self.store.save_connection(connection).await?;
        }
        rooms
            .join_room(connection, &connection.socket_id)
            .await
            .map_err(handler_error)?;

        let reply = SocketPacket::connect(
            packet.namespace,
            Some(json!({ "sid": connection.socket_id })),
        );
        self.queue
            .enqueue(&connection.direct_room(), reply, None)
            .await?;

        debug!(session = %connection.session_id, namespace = %connection.namespace, "Namespace connected");
        Ok(())
    }

    /// Join or leave the room named by the first argument.
    async fn on_membership(
        &self,
        connection: &Connection,
        packet: &SocketPacket,
        join: bool,
    ) -> Result<(), TransportError> {
        let Some(room) = packet.args().first().and_then(Value::as_str) else {
            return Err(TransportError::Handler(
                "room membership requires a room name".to_string(),
            ));
        };

        let rooms = self.lifecycle.rooms();
        let changed = if join {
            rooms.join_room(connection, room).await
        } else {
            rooms.leave_room(connection, room).await
        }
        .map_err(handler_error)?;

        if let Some(id) = packet.id {
            let ack = SocketPacket::ack(packet.namespace.as_str(), id, vec![json!(changed)]);
            self.queue
                .enqueue(&connection.direct_room(), ack, None)
                .await?;
        }
        Ok(())
    }

    /// Dispatch an application event and relay it to the sender's rooms.
    async fn on_event(
        &self,
        connection: &Connection,
        packet: &SocketPacket,
    ) -> Result<(), TransportError> {
        let event = packet.event_name().unwrap_or_default();
        let args = packet.args().to_vec();
        metrics::record_event(event);
        self.dispatcher
            .dispatch(event, connection, &Value::Array(args.clone()));

        let rooms: Vec<String> = self
            .lifecycle
            .rooms()
            .rooms_of(&connection.session_id)
            .await
            .map_err(handler_error)?
            .into_iter()
            .filter(|room| room.namespace() == connection.namespace)
            .map(|room| room.name().to_string())
            .collect();

        let reached = self
            .broadcaster
            .send_to_rooms(&rooms, &connection.namespace, event, args, Some(connection))
            .await?;

        trace!(session = %connection.session_id, event = %event, reached, "Relayed event");
        Ok(())
    }
}

#[async_trait]
impl PacketHandler for SocketHandler {
    async fn handle(
        &self,
        connection: &mut Connection,
        packet: SocketPacket,
    ) -> Result<(), TransportError> {
        match packet.packet_type {
            SocketPacketType::Connect => self.on_connect(connection, packet).await,
            SocketPacketType::Disconnect => {
                metrics::record_disconnect("client");
                self.lifecycle
                    .disconnect(connection)
                    .await
                    .map_err(handler_error)
            }
            kind if kind.is_event() => match packet.event_name() {
                Some(JOIN_EVENT) => self.on_membership(connection, &packet, true).await,
                Some(LEAVE_EVENT) => self.on_membership(connection, &packet, false).await,
                _ => self.on_event(connection, &packet).await,
            },
            other => {
                trace!(session = %connection.session_id, packet = ?other, "Ignored packet");
                Ok(())
            }
        }
    }
}

fn handler_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::Handler(err.to_string())
}
