//! Routed messages.
//!
//! A message is one Socket.IO packet addressed to a set of rooms (or to
//! everyone, for broadcasts). Messages are immutable once created and are
//! shared between their deliveries.

use relay_protocol::{SocketPacket, SocketPacketType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::room::RoomKey;

/// A unique message identifier.
pub type MessageId = u64;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    // Combine timestamp with atomic counter for guaranteed uniqueness
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// Routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Namespace the message is emitted on.
    pub namespace: String,
    /// Unique message id.
    pub message_id: MessageId,
}

/// A routed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Socket.IO packet type this message is sent as.
    pub kind: SocketPacketType,
    /// Event name (empty for non-event packets).
    pub event: String,
    /// Ordered arguments.
    pub args: Vec<Value>,
    /// Acknowledgement id carried by the packet.
    pub ack_id: Option<u64>,
    /// Sender session id.
    pub sender: Option<String>,
    /// Target rooms; empty for broadcasts.
    pub rooms: Vec<RoomKey>,
    /// Routing metadata.
    pub metadata: MessageMetadata,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
}

impl Message {
    /// Create an event message.
    #[must_use]
    pub fn event(namespace: &str, event: &str, args: Vec<Value>, now: u64) -> Self {
        Self {
            kind: SocketPacketType::Event,
            event: event.to_string(),
            args,
            ack_id: None,
            sender: None,
            rooms: Vec::new(),
            metadata: MessageMetadata {
                namespace: namespace.to_string(),
                message_id: generate_message_id(),
            },
            created_at: now,
        }
    }

    /// Build a message from an arbitrary Socket.IO packet.
    #[must_use]
    pub fn from_packet(packet: &SocketPacket, now: u64) -> Self {
        let (event, args) = match packet.packet_type {
            SocketPacketType::Event | SocketPacketType::BinaryEvent => (
                packet.event_name().unwrap_or_default().to_string(),
                packet.args().to_vec(),
            ),
            SocketPacketType::Ack | SocketPacketType::BinaryAck => match &packet.data {
                Some(Value::Array(items)) => (String::new(), items.clone()),
                Some(other) => (String::new(), vec![other.clone()]),
                None => (String::new(), Vec::new()),
            },
            _ => (String::new(), packet.data.iter().cloned().collect()),
        };

        Self {
            kind: packet.packet_type,
            event,
            args,
            ack_id: packet.id,
            ..Self::event(&packet.namespace, "", Vec::new(), now)
        }
    }

    /// Set the sender.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Set the target rooms.
    #[must_use]
    pub fn with_rooms(mut self, rooms: Vec<RoomKey>) -> Self {
        self.rooms = rooms;
        self
    }

    /// Message id.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.metadata.message_id
    }

    /// Namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Whether the message is addressed to `room`.
    #[must_use]
    pub fn targets(&self, room: &RoomKey) -> bool {
        self.rooms.iter().any(|r| r == room)
    }

    /// Rebuild the Socket.IO packet this message is sent as.
    #[must_use]
    pub fn to_packet(&self) -> SocketPacket {
        let namespace = self.namespace();
        let mut packet = match self.kind {
            SocketPacketType::Event | SocketPacketType::BinaryEvent => {
                let mut packet = SocketPacket::event(namespace, &self.event, self.args.clone());
                packet.packet_type = self.kind;
                packet
            }
            SocketPacketType::Ack | SocketPacketType::BinaryAck => SocketPacket {
                data: Some(Value::Array(self.args.clone())),
                ..SocketPacket::new(self.kind, namespace)
            },
            _ => SocketPacket {
                data: self.args.first().cloned(),
                ..SocketPacket::new(self.kind, namespace)
            },
        };
        packet.id = self.ack_id;
        packet
    }
}
