//! Transport abstraction traits for Relay.
//!
//! These traits define the interface every transport implementation
//! provides, so the HTTP layer stays transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use relay_protocol::{PayloadProcessor, ProtocolError, SocketPacket};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_core::{
    Connection, ConnectionLifecycle, DeliveryQueue, SharedClock, SharedStore, StoreError,
    TransportKind,
};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was disconnected while a request was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No connection with this session id.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Transport kind not registered.
    #[error("Unsupported transport: {0}")]
    Unsupported(String),

    /// Request body over the configured limit.
    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The packet handler failed.
    #[error("Handler error: {0}")]
    Handler(String),
}

/// Receives Socket.IO packets posted by clients.
#[async_trait]
pub trait PacketHandler: Send + Sync + fmt::Debug {
    /// Handle one inbound packet from `connection`.
    async fn handle(
        &self,
        connection: &mut Connection,
        packet: SocketPacket,
    ) -> Result<(), TransportError>;
}

/// A server-side transport strategy.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// The transport kind.
    fn kind(&self) -> TransportKind;

    /// Transports a client on this one may upgrade to.
    fn upgrades(&self) -> Vec<String> {
        Vec::new()
    }

    /// Serve one outbound request, returning the framed payload.
    async fn poll(
        &self,
        connection: &Connection,
        payload: &PayloadProcessor,
    ) -> Result<Bytes, TransportError>;

    /// Process one inbound request body. Returns the number of Engine.IO
    /// packets handled.
    async fn receive(
        &self,
        connection: &mut Connection,
        body: &[u8],
        payload: &PayloadProcessor,
    ) -> Result<usize, TransportError>;
}

/// Long-polling limits and timings.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Longest a poll waits before answering with a ping.
    pub ping_interval: Duration,
    /// Largest outbound payload, before base64 or JSONP expansion.
    pub max_payload_size: usize,
    /// Largest accepted request body.
    pub max_http_buffer_size: usize,
    /// Sleep between checks for new deliveries.
    pub poll_tick: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            max_payload_size: 100_000,
            max_http_buffer_size: 1_000_000,
            poll_tick: Duration::from_millis(100),
        }
    }
}

/// Everything a transport needs to serve requests.
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub store: SharedStore,
    pub queue: Arc<DeliveryQueue>,
    pub lifecycle: ConnectionLifecycle,
    pub handler: Arc<dyn PacketHandler>,
    pub clock: SharedClock,
    pub config: PollingConfig,
}
