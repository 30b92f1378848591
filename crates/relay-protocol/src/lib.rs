//! # relay-protocol
//!
//! Wire protocol support for the Relay realtime engine.
//!
//! Relay speaks Engine.IO (transport framing) and Socket.IO (namespaced
//! events) over HTTP long-polling. This crate holds the pieces with no I/O:
//!
//! - **Packets** - Engine.IO and Socket.IO packet types
//! - **Codec** - text encoding of both packet layers
//! - **Payload** - batching several packets into one HTTP body
//! - **Version** - Engine.IO revision negotiation
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, PacketCodec, PayloadProcessor};
//!
//! let codec = PacketCodec::new();
//! let packet = codec.create_event("/", "chat", vec!["hello".into()]);
//!
//! let encoded = codec::encode_engine(&packet);
//! let payload = PayloadProcessor::new().encode_payload(&[encoded.clone()]);
//!
//! let packets = PayloadProcessor::new().decode_payload(&payload).unwrap();
//! assert_eq!(codec::decode_engine(&packets[0]).unwrap(), packet);
//! ```

pub mod codec;
pub mod packets;
pub mod payload;
pub mod version;

pub use codec::{decode_engine, decode_socket, encode_engine, encode_socket, PacketCodec, ProtocolError};
pub use packets::{
    EnginePacket, EnginePacketType, Handshake, SocketPacket, SocketPacketType, DEFAULT_NAMESPACE,
};
pub use payload::PayloadProcessor;
pub use version::{Revision, PROTOCOL_REVISION};
