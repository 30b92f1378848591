//! Codec for encoding and decoding Engine.IO and Socket.IO packets.
//!
//! Engine.IO packets are encoded as a single type digit followed by the raw
//! packet data. Socket.IO packets are encoded as a type digit, an optional
//! `/namespace,` segment, an optional numeric ack id, and an optional JSON
//! payload.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use std::fmt::Write;
use thiserror::Error;

use crate::packets::{
    EnginePacket, EnginePacketType, Handshake, SocketPacket, SocketPacketType, DEFAULT_NAMESPACE,
};

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Nothing to decode.
    #[error("Empty packet")]
    Empty,

    /// The leading type digit is missing or out of range.
    #[error("Invalid packet type: {0:?}")]
    InvalidPacketType(char),

    /// Ack id does not fit in a u64.
    #[error("Invalid ack id")]
    InvalidAckId,

    /// Packet data is not valid UTF-8 text.
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Socket.IO payload is not valid JSON.
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Malformed transport payload (bad base64, missing JSONP body).
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Engine.IO revision the server does not speak.
    #[error("Unsupported protocol revision: {0}")]
    UnsupportedRevision(u8),
}

fn type_digit(value: u8) -> u8 {
    b'0' + value
}

/// Encode an Engine.IO packet to bytes.
#[must_use]
pub fn encode_engine(packet: &EnginePacket) -> Bytes {
    let data_len = packet.data.as_ref().map_or(0, Bytes::len);
    let mut buf = BytesMut::with_capacity(1 + data_len);
    buf.put_u8(type_digit(packet.packet_type.into()));
    if let Some(data) = &packet.data {
        buf.extend_from_slice(data);
    }
    buf.freeze()
}

/// Decode an Engine.IO packet from bytes.
///
/// # Errors
///
/// Returns an error if the input is empty or the type digit is out of range.
pub fn decode_engine(data: &[u8]) -> Result<EnginePacket, ProtocolError> {
    let (&first, rest) = data.split_first().ok_or(ProtocolError::Empty)?;
    let packet_type = first
        .checked_sub(b'0')
        .and_then(|digit| EnginePacketType::try_from(digit).ok())
        .ok_or(ProtocolError::InvalidPacketType(char::from(first)))?;

    Ok(EnginePacket::new(
        packet_type,
        Some(Bytes::copy_from_slice(rest)),
    ))
}

/// Encode a Socket.IO packet to its text form.
#[must_use]
pub fn encode_socket(packet: &SocketPacket) -> String {
    let mut out = String::with_capacity(16);
    out.push(char::from(type_digit(packet.packet_type.into())));

    if !packet.namespace.is_empty() && packet.namespace != DEFAULT_NAMESPACE {
        out.push_str(&packet.namespace);
        out.push(',');
    }

    if let Some(id) = packet.id {
        let _ = write!(out, "{id}");
    }

    if let Some(data) = &packet.data {
        out.push_str(&data.to_string());
    }

    out
}

/// Decode a Socket.IO packet from its text form.
///
/// # Errors
///
/// Returns an error if the type digit is invalid, the ack id overflows, or
/// the payload is not valid JSON.
pub fn decode_socket(text: &str) -> Result<SocketPacket, ProtocolError> {
    let first = text.chars().next().ok_or(ProtocolError::Empty)?;
    let packet_type = first
        .to_digit(10)
        .and_then(|digit| SocketPacketType::try_from(digit as u8).ok())
        .ok_or(ProtocolError::InvalidPacketType(first))?;

    let mut rest = &text[first.len_utf8()..];

    let mut namespace = DEFAULT_NAMESPACE.to_string();
    if rest.starts_with('/') {
        // A comma only ends the namespace if it precedes the payload
        let end = match rest.find([',', '[', '{']) {
            Some(i) if rest[i..].starts_with(',') => i,
            _ => rest
                .find(|c: char| matches!(c, '[' | '{') || c.is_ascii_digit())
                .unwrap_or(rest.len()),
        };
        namespace = rest[..end].to_string();
        rest = rest[end..].strip_prefix(',').unwrap_or(&rest[end..]);
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = if digits > 0 {
        Some(
            rest[..digits]
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidAckId)?,
        )
    } else {
        None
    };
    rest = &rest[digits..];

    let data = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(rest)?)
    };

    Ok(SocketPacket {
        packet_type,
        namespace,
        id,
        data,
    })
}

/// Codec for the two packet layers, plus convenience constructors that
/// wrap Socket.IO packets into Engine.IO `Message` packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl PacketCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encode an Engine.IO packet.
    #[must_use]
    pub fn encode(&self, packet: &EnginePacket) -> Bytes {
        encode_engine(packet)
    }

    /// Decode an Engine.IO packet.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, data: &[u8]) -> Result<EnginePacket, ProtocolError> {
        decode_engine(data)
    }

    /// Encode a Socket.IO packet.
    #[must_use]
    pub fn encode_socket(&self, packet: &SocketPacket) -> String {
        encode_socket(packet)
    }

    /// Decode a Socket.IO packet.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_socket(&self, text: &str) -> Result<SocketPacket, ProtocolError> {
        decode_socket(text)
    }

    /// Decode the Socket.IO packet carried by an Engine.IO `Message` packet.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet has no data or the data is not a valid
    /// Socket.IO packet.
    pub fn unwrap_message(&self, packet: &EnginePacket) -> Result<SocketPacket, ProtocolError> {
        let data = packet.data.as_ref().ok_or(ProtocolError::Empty)?;
        decode_socket(std::str::from_utf8(data)?)
    }

    /// Wrap a Socket.IO packet in an Engine.IO `Message` packet.
    #[must_use]
    pub fn wrap(&self, packet: &SocketPacket) -> EnginePacket {
        EnginePacket::message(encode_socket(packet))
    }

    /// Socket.IO `Connect` reply carrying the socket id, wrapped for transport.
    #[must_use]
    pub fn create_connect(&self, namespace: &str, socket_id: &str) -> EnginePacket {
        self.wrap(&SocketPacket::connect(
            namespace,
            Some(serde_json::json!({ "sid": socket_id })),
        ))
    }

    /// Socket.IO `Event`, wrapped for transport.
    #[must_use]
    pub fn create_event(&self, namespace: &str, event: &str, args: Vec<Value>) -> EnginePacket {
        self.wrap(&SocketPacket::event(namespace, event, args))
    }

    /// Engine.IO `Open` packet for a handshake.
    #[must_use]
    pub fn create_open(&self, handshake: &Handshake) -> EnginePacket {
        EnginePacket::open(handshake)
    }

    /// Engine.IO `Ping` packet.
    #[must_use]
    pub fn create_ping(&self) -> EnginePacket {
        EnginePacket::ping()
    }
}
