//! HTTP long-polling transport.
//!
//! A GET holds the request open until deliveries are pending for the
//! session, the ping interval runs out, or the session is disconnected by
//! another worker. A POST carries a payload of inbound packets.

use async_trait::async_trait;
use bytes::Bytes;
use relay_protocol::{EnginePacketType, PacketCodec, PayloadProcessor};
use std::collections::HashSet;
use tenvis_relay_core::{Connection, Delivery, DeliveryId, TransportKind};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::traits::{Transport, TransportContext, TransportError};

/// Long-polling transport.
#[derive(Debug, Clone)]
pub struct PollingTransport {
    ctx: TransportContext,
    codec: PacketCodec,
}

impl PollingTransport {
    /// Create a polling transport.
    #[must_use]
    pub fn new(ctx: TransportContext) -> Self {
        Self {
            ctx,
            codec: PacketCodec::new(),
        }
    }

    fn now(&self) -> u64 {
        self.ctx.clock.now_millis()
    }

    /// Re-read the stored record; a missing or disconnected session ends
    /// the poll.
    async fn reload(&self, session_id: &str) -> Result<Connection, TransportError> {
        match self.ctx.store.find_by_session_id(session_id).await? {
            Some(latest) if latest.connected => Ok(latest),
            _ => {
                debug!(session = %session_id, "Session closed during poll");
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    /// Greedily pack pending deliveries, oldest first, into at most
    /// `max_payload_size` bytes counting one separator between packets.
    ///
    /// A packet too large to ever fit spends one retry per poll; while it
    /// has retries left it holds its place and packing stops there.
    async fn pack(
        &self,
        pending: Vec<Delivery>,
        retried: &mut HashSet<DeliveryId>,
    ) -> Result<Vec<(Delivery, Bytes)>, TransportError> {
        let max = self.ctx.config.max_payload_size;
        let mut packed = Vec::new();
        let mut size = 0;

        for mut delivery in pending {
            let encoded = self
                .codec
                .encode(&self.codec.wrap(&delivery.message.to_packet()));

            if encoded.len() > max {
                if !retried.insert(delivery.id) {
                    break;
                }
                warn!(
                    delivery = delivery.id,
                    size = encoded.len(),
                    limit = max,
                    "Delivery exceeds payload limit"
                );
                if self.ctx.queue.retry(&mut delivery).await? {
                    break;
                }
                continue;
            }

            let framed = if packed.is_empty() {
                encoded.len()
            } else {
                encoded.len() + 1
            };
            if size + framed > max {
                break;
            }
            size += framed;
            packed.push((delivery, encoded));
        }

        Ok(packed)
    }

    async fn deliver(
        &self,
        session_id: &str,
        packed: Vec<(Delivery, Bytes)>,
        payload: &PayloadProcessor,
    ) -> Result<Bytes, TransportError> {
        let mut connection = self.reload(session_id).await?;

        let mut packets = Vec::with_capacity(packed.len());
        for (mut delivery, encoded) in packed {
            self.ctx.queue.mark_delivered(&mut delivery).await?;
            packets.push(encoded);
        }

        let now = self.now();
        connection.record_delivery(now);
        let half_interval = self.ctx.config.ping_interval.as_millis() as u64 / 2;
        if connection.ping_age(now).map_or(true, |age| age > half_interval) {
            connection.touch_active(now);
        }
        self.ctx.store.save_connection(&connection).await?;

        debug!(session = %connection.session_id, packets = packets.len(), "Delivered");
        Ok(payload.encode_payload(&packets))
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn poll(
        &self,
        connection: &Connection,
        payload: &PayloadProcessor,
    ) -> Result<Bytes, TransportError> {
        let config = &self.ctx.config;
        let deadline = Instant::now() + config.ping_interval;
        let mut retried = HashSet::new();

        let session_id = connection.session_id.as_str();
        let mut current = self.reload(session_id).await?;
        current.record_poll(self.now());
        self.ctx.store.save_connection(&current).await?;

        loop {
            let pending = self.ctx.queue.pending(session_id).await?;
            if !pending.is_empty() {
                let packed = self.pack(pending, &mut retried).await?;
                if !packed.is_empty() {
                    return self.deliver(session_id, packed, payload).await;
                }
            }

            if Instant::now() >= deadline {
                let mut current = self.reload(session_id).await?;
                current.touch_ping(self.now());
                self.ctx.store.save_connection(&current).await?;
                trace!(session = %session_id, "Poll timed out, sending ping");

                let ping = self.codec.encode(&self.codec.create_ping());
                return Ok(payload.encode_payload(&[ping]));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(config.poll_tick.min(remaining)).await;
            self.reload(session_id).await?;
        }
    }

    async fn receive(
        &self,
        connection: &mut Connection,
        body: &[u8],
        payload: &PayloadProcessor,
    ) -> Result<usize, TransportError> {
        let limit = self.ctx.config.max_http_buffer_size;
        if body.len() > limit {
            return Err(TransportError::PayloadTooLarge {
                size: body.len(),
                limit,
            });
        }

        let body = if payload.jsonp_index().is_some() {
            payload.decode_jsonp_body(body)?
        } else {
            Bytes::copy_from_slice(body)
        };

        let packets = payload.decode_payload(&body)?;
        let count = packets.len();
        for raw in packets {
            let packet = self.codec.decode(&raw)?;
            match packet.packet_type {
                EnginePacketType::Message => {
                    let inbound = self.codec.unwrap_message(&packet)?;
                    self.ctx.handler.handle(connection, inbound).await?;
                }
                EnginePacketType::Ping | EnginePacketType::Pong => {
                    self.ctx.lifecycle.record_ping(connection).await?;
                }
                // The client closes once the response is sent
                EnginePacketType::Close => {}
                other => trace!(session = %connection.session_id, packet = ?other, "Ignored packet"),
            }
        }

        trace!(session = %connection.session_id, packets = count, "Received payload");
        Ok(count)
    }
}
