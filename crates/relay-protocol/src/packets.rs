//! Packet types for the Engine.IO and Socket.IO layers.
//!
//! Engine.IO packets are the transport-level unit: a single type digit
//! followed by optional data. Socket.IO packets ride inside Engine.IO
//! `Message` packets and carry namespaced events and acknowledgements.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The default Socket.IO namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnginePacketType {
    Open = 0,
    Close = 1,
    Ping = 2,
    Pong = 3,
    Message = 4,
    Upgrade = 5,
    Noop = 6,
}

impl From<EnginePacketType> for u8 {
    fn from(pt: EnginePacketType) -> u8 {
        pt as u8
    }
}

impl TryFrom<u8> for EnginePacketType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(EnginePacketType::Open),
            1 => Ok(EnginePacketType::Close),
            2 => Ok(EnginePacketType::Ping),
            3 => Ok(EnginePacketType::Pong),
            4 => Ok(EnginePacketType::Message),
            5 => Ok(EnginePacketType::Upgrade),
            6 => Ok(EnginePacketType::Noop),
            _ => Err("Invalid engine packet type"),
        }
    }
}

/// Socket.IO packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum SocketPacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    Error = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl From<SocketPacketType> for u8 {
    fn from(pt: SocketPacketType) -> u8 {
        pt as u8
    }
}

impl TryFrom<u8> for SocketPacketType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(SocketPacketType::Connect),
            1 => Ok(SocketPacketType::Disconnect),
            2 => Ok(SocketPacketType::Event),
            3 => Ok(SocketPacketType::Ack),
            4 => Ok(SocketPacketType::Error),
            5 => Ok(SocketPacketType::BinaryEvent),
            6 => Ok(SocketPacketType::BinaryAck),
            _ => Err("Invalid socket packet type"),
        }
    }
}

impl SocketPacketType {
    /// Whether packets of this type carry an event name as their first argument.
    #[must_use]
    pub fn is_event(self) -> bool {
        matches!(self, SocketPacketType::Event | SocketPacketType::BinaryEvent)
    }
}

/// Handshake body sent inside the Engine.IO `Open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Session identifier the client must send back as `sid`.
    pub sid: String,
    /// Transports the client may upgrade to.
    pub upgrades: Vec<String>,
    /// Ping interval in milliseconds.
    pub ping_interval: u64,
    /// Ping timeout in milliseconds.
    pub ping_timeout: u64,
    /// Maximum payload size the server will send in one response.
    pub max_payload: u64,
}

/// An Engine.IO packet.
///
/// Empty data is normalised to `None`, so a packet built with an empty
/// body compares equal to its decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePacket {
    /// Packet type.
    pub packet_type: EnginePacketType,
    /// Optional packet data.
    pub data: Option<Bytes>,
}

impl EnginePacket {
    /// Create a packet with optional data.
    #[must_use]
    pub fn new(packet_type: EnginePacketType, data: Option<Bytes>) -> Self {
        Self {
            packet_type,
            data: data.filter(|d| !d.is_empty()),
        }
    }

    /// Create an `Open` packet carrying the handshake JSON.
    #[must_use]
    pub fn open(handshake: &Handshake) -> Self {
        // Handshake only holds strings and integers.
        let body = serde_json::to_vec(handshake).unwrap_or_default();
        Self::new(EnginePacketType::Open, Some(Bytes::from(body)))
    }

    /// Create a `Close` packet.
    #[must_use]
    pub fn close() -> Self {
        Self::new(EnginePacketType::Close, None)
    }

    /// Create a `Ping` packet.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(EnginePacketType::Ping, None)
    }

    /// Create a `Pong` packet, echoing optional probe data.
    #[must_use]
    pub fn pong(data: Option<Bytes>) -> Self {
        Self::new(EnginePacketType::Pong, data)
    }

    /// Create a `Message` packet.
    #[must_use]
    pub fn message(data: impl Into<Bytes>) -> Self {
        Self::new(EnginePacketType::Message, Some(data.into()))
    }

    /// Create a `Noop` packet.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(EnginePacketType::Noop, None)
    }

    /// Data as UTF-8 text, if present and valid.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| std::str::from_utf8(d).ok())
    }
}

/// A Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    /// Packet type.
    pub packet_type: SocketPacketType,
    /// Namespace, `/` by default.
    pub namespace: String,
    /// Acknowledgement id.
    pub id: Option<u64>,
    /// JSON payload. Events carry an array whose first element is the event name.
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Create an empty packet of the given type on a namespace.
    #[must_use]
    pub fn new(packet_type: SocketPacketType, namespace: impl Into<String>) -> Self {
        Self {
            packet_type,
            namespace: namespace.into(),
            id: None,
            data: None,
        }
    }

    /// Create a `Connect` packet with optional data (e.g. `{"sid": ...}`).
    #[must_use]
    pub fn connect(namespace: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            data,
            ..Self::new(SocketPacketType::Connect, namespace)
        }
    }

    /// Create a `Disconnect` packet.
    #[must_use]
    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self::new(SocketPacketType::Disconnect, namespace)
    }

    /// Create an `Event` packet. The event name becomes the first array element.
    #[must_use]
    pub fn event(namespace: impl Into<String>, event: &str, args: Vec<Value>) -> Self {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Value::String(event.to_string()));
        items.extend(args);
        Self {
            data: Some(Value::Array(items)),
            ..Self::new(SocketPacketType::Event, namespace)
        }
    }

    /// Create an `Ack` packet answering the given id.
    #[must_use]
    pub fn ack(namespace: impl Into<String>, id: u64, args: Vec<Value>) -> Self {
        Self {
            id: Some(id),
            data: Some(Value::Array(args)),
            ..Self::new(SocketPacketType::Ack, namespace)
        }
    }

    /// Create an `Error` packet.
    #[must_use]
    pub fn error(namespace: impl Into<String>, message: &str) -> Self {
        Self {
            data: Some(serde_json::json!({ "message": message })),
            ..Self::new(SocketPacketType::Error, namespace)
        }
    }

    /// Set the acknowledgement id.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Event name for `Event` / `BinaryEvent` packets.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        if !self.packet_type.is_event() {
            return None;
        }
        self.data.as_ref()?.as_array()?.first()?.as_str()
    }

    /// Event arguments (everything after the event name).
    ///
    /// For non-event packets with array data, the whole array is returned.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        let items = match self.data.as_ref().and_then(Value::as_array) {
            Some(items) => items.as_slice(),
            None => return &[],
        };
        if self.packet_type.is_event() && !items.is_empty() {
            &items[1..]
        } else {
            items
        }
    }
}
