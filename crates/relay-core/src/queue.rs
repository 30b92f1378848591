//! Delivery queue.
//!
//! Each room has a bounded in-memory ring buffer for fast dequeues in this
//! process, backed by durable per-recipient [`Delivery`] records that
//! survive restarts and are shared across processes.

use dashmap::DashMap;
use relay_protocol::SocketPacket;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::clock::SharedClock;
use crate::delivery::{Delivery, MAX_RETRIES};
use crate::message::Message;
use crate::room::RoomKey;
use crate::store::{SharedStore, StoreResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// In-memory entries kept per room.
    pub capacity: usize,
    /// Age after which in-memory entries are evicted.
    pub max_age: Duration,
    /// Failed attempts allowed per delivery.
    pub max_retries: u32,
    /// Retention window for durable records, in days.
    pub retention_days: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            max_age: Duration::from_secs(300),
            max_retries: MAX_RETRIES,
            retention_days: 7,
        }
    }
}

/// A queued packet.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// The Socket.IO packet.
    pub packet: SocketPacket,
    /// Sender session id.
    pub sender_id: Option<String>,
    /// Enqueue time, epoch milliseconds.
    pub timestamp: u64,
}

/// Fixed-capacity FIFO that evicts its oldest entry when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append an item, returning the evicted oldest item if full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Keep only items matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    /// Items oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Result of a queue cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCleanup {
    /// In-memory entries evicted for age.
    pub evicted: usize,
    /// Durable deliveries deleted.
    pub deliveries_removed: usize,
    /// Durable messages deleted.
    pub messages_removed: usize,
}

/// Per-room delivery queue.
#[derive(Debug)]
pub struct DeliveryQueue {
    queues: DashMap<RoomKey, RingBuffer<QueueEntry>>,
    store: SharedStore,
    clock: SharedClock,
    config: QueueConfig,
}

impl DeliveryQueue {
    /// Create a queue.
    #[must_use]
    pub fn new(store: SharedStore, clock: SharedClock, config: QueueConfig) -> Self {
        Self {
            queues: DashMap::new(),
            store,
            clock,
            config,
        }
    }

    /// Queue configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a packet for a room.
    ///
    /// The packet is appended to the room's in-memory buffer and persisted
    /// as a message with one pending delivery per room member other than
    /// the sender, connected or not. Returns the number of deliveries
    /// created.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn enqueue(
        &self,
        room: &RoomKey,
        packet: SocketPacket,
        sender_id: Option<&str>,
    ) -> StoreResult<usize> {
        let now = self.clock.now_millis();

        let mut message = Message::from_packet(&packet, now).with_rooms(vec![room.clone()]);
        if let Some(sender) = sender_id {
            message = message.with_sender(sender);
        }
        let message = Arc::new(message);
        self.store.save_message(message.clone()).await?;

        let mut created = 0;
        if let Some(target) = self.store.find_room(room).await? {
            for member in target.members() {
                if Some(member) == sender_id {
                    continue;
                }
                let delivery = Delivery::new(message.clone(), member, now);
                self.store.save_delivery(&delivery).await?;
                created += 1;
            }
        }

        let entry = QueueEntry {
            packet,
            sender_id: sender_id.map(str::to_string),
            timestamp: now,
        };
        let evicted = self
            .queues
            .entry(room.clone())
            .or_insert_with(|| RingBuffer::new(self.config.capacity))
            .push(entry);
        if evicted.is_some() {
            trace!(room = %room, "Evicted oldest queued entry");
        }

        debug!(room = %room, deliveries = created, "Enqueued packet");
        Ok(created)
    }

    /// Entries for a room enqueued strictly after `since`, oldest first.
    ///
    /// Served from memory when this process holds a buffer for the room,
    /// otherwise rebuilt from persisted messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn dequeue(&self, room: &RoomKey, since: u64) -> StoreResult<Vec<QueueEntry>> {
        if let Some(queue) = self.queues.get(room) {
            return Ok(queue
                .iter()
                .filter(|entry| entry.timestamp > since)
                .cloned()
                .collect());
        }

        let messages = self.store.find_room_messages_since(room, since).await?;
        Ok(messages
            .iter()
            .map(|message| QueueEntry {
                packet: message.to_packet(),
                sender_id: message.sender.clone(),
                timestamp: message.created_at,
            })
            .collect())
    }

    /// Evict stale in-memory entries and purge expired durable records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn cleanup_queues(&self) -> StoreResult<QueueCleanup> {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(self.config.max_age.as_millis() as u64);

        let mut evicted = 0;
        for mut queue in self.queues.iter_mut() {
            let before = queue.len();
            queue.retain(|entry| entry.timestamp >= cutoff);
            evicted += before - queue.len();
        }
        self.queues.retain(|_, queue| !queue.is_empty());

        let deliveries_removed = self.cleanup_deliveries(self.config.retention_days).await?;
        let messages_removed = self
            .store
            .cleanup_old_messages(self.config.retention_days)
            .await?;

        debug!(evicted, deliveries_removed, messages_removed, "Queue cleanup");
        Ok(QueueCleanup {
            evicted,
            deliveries_removed,
            messages_removed,
        })
    }

    /// Record a failed attempt and persist the delivery.
    ///
    /// Returns `true` while attempts remain; once exhausted the delivery is
    /// stored as failed and `false` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn retry(&self, delivery: &mut Delivery) -> StoreResult<bool> {
        let more = delivery.record_retry(self.config.max_retries);
        self.store.save_delivery(delivery).await?;

        if !more {
            warn!(
                delivery = delivery.id,
                session = %delivery.connection,
                retries = delivery.retries,
                "Delivery failed"
            );
        }
        Ok(more)
    }

    /// Delete delivery records older than `days` days.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn cleanup_deliveries(&self, days: u32) -> StoreResult<usize> {
        self.store.cleanup_old_deliveries(days).await
    }

    /// Pending deliveries for a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn pending(&self, session_id: &str) -> StoreResult<Vec<Delivery>> {
        self.store.find_pending_deliveries(session_id).await
    }

    /// Mark a delivery as delivered and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn mark_delivered(&self, delivery: &mut Delivery) -> StoreResult<()> {
        delivery.mark_delivered(self.clock.now_millis());
        self.store.save_delivery(delivery).await
    }

    /// In-memory entries held for a room.
    #[must_use]
    pub fn queue_len(&self, room: &RoomKey) -> usize {
        self.queues.get(room).map_or(0, |queue| queue.len())
    }

    /// Number of rooms with an in-memory buffer.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.queues.len()
    }
}
