//! In-process [`Store`] backed by concurrent hash maps.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::{days_to_millis, SharedClock};
use crate::connection::Connection;
use crate::delivery::{Delivery, DeliveryId};
use crate::message::{Message, MessageId};
use crate::room::{Room, RoomKey};
use crate::store::{MemberRemoval, Store, StoreResult};

/// A store that keeps everything in memory.
#[derive(Debug)]
pub struct MemoryStore {
    connections: DashMap<String, Connection>,
    rooms: DashMap<RoomKey, Room>,
    messages: DashMap<MessageId, Arc<Message>>,
    deliveries: DashMap<DeliveryId, Delivery>,
    clock: SharedClock,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            messages: DashMap::new(),
            deliveries: DashMap::new(),
            clock,
        }
    }

    /// Store statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            connection_count: self.connections.len(),
            room_count: self.rooms.len(),
            message_count: self.messages.len(),
            delivery_count: self.deliveries.len(),
        }
    }

    fn cutoff(&self, days: u32) -> u64 {
        self.clock.now_millis().saturating_sub(days_to_millis(days))
    }

    fn room_messages(&self, key: &RoomKey, keep: impl Fn(&Message) -> bool) -> Vec<Arc<Message>> {
        let mut found: Vec<Arc<Message>> = self
            .messages
            .iter()
            .filter(|m| m.targets(key) && keep(m))
            .map(|m| Arc::clone(m.value()))
            .collect();
        found.sort_by_key(|m| (m.created_at, m.id()));
        found
    }
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub connection_count: usize,
    pub room_count: usize,
    pub message_count: usize,
    pub delivery_count: usize,
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_connection(&self, connection: &Connection) -> StoreResult<()> {
        self.connections
            .insert(connection.session_id.clone(), connection.clone());
        Ok(())
    }

    async fn find_by_session_id(&self, session_id: &str) -> StoreResult<Option<Connection>> {
        Ok(self.connections.get(session_id).map(|c| c.clone()))
    }

    async fn find_by_client_id(&self, client_id: &str) -> StoreResult<Vec<Connection>> {
        Ok(self
            .connections
            .iter()
            .filter(|c| c.client_id.as_deref() == Some(client_id))
            .map(|c| c.clone())
            .collect())
    }

    async fn find_active_connections(
        &self,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<Connection>> {
        let mut active: Vec<Connection> = self
            .connections
            .iter()
            .filter(|c| c.connected && namespace.map_or(true, |ns| c.namespace == ns))
            .map(|c| c.clone())
            .collect();
        active.sort_by_key(|c| c.created_at);
        Ok(active)
    }

    async fn cleanup_inactive_connections(&self, inactive_for: Duration) -> StoreResult<usize> {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(inactive_for.as_millis() as u64);
        let before = self.connections.len();
        self.connections
            .retain(|_, c| c.connected || c.last_active_time >= cutoff);
        let removed = before.saturating_sub(self.connections.len());
        if removed > 0 {
            debug!(removed, "Removed inactive connections");
        }
        Ok(removed)
    }

    async fn find_room(&self, key: &RoomKey) -> StoreResult<Option<Room>> {
        Ok(self.rooms.get(key).map(|r| r.clone()))
    }

    async fn find_or_create_room(&self, key: &RoomKey) -> StoreResult<Room> {
        let now = self.clock.now_millis();
        Ok(self
            .rooms
            .entry(key.clone())
            .or_insert_with(|| Room::new(key.clone(), now))
            .clone())
    }

    async fn save_room(&self, room: &Room) -> StoreResult<()> {
        self.rooms.insert(room.key.clone(), room.clone());
        Ok(())
    }

    async fn find_rooms_by_connection(&self, session_id: &str) -> StoreResult<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|r| r.has_member(session_id))
            .map(|r| r.clone())
            .collect();
        rooms.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rooms)
    }

    async fn add_member(&self, key: &RoomKey, session_id: &str) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        let added = self
            .rooms
            .entry(key.clone())
            .or_insert_with(|| Room::new(key.clone(), now))
            .add_member(session_id);
        Ok(added)
    }

    async fn remove_member(&self, key: &RoomKey, session_id: &str) -> StoreResult<MemberRemoval> {
        let mut removed = false;
        let room_deleted = self
            .rooms
            .remove_if_mut(key, |_, room| {
                removed = room.remove_member(session_id);
                room.is_empty()
            })
            .is_some();
        Ok(MemberRemoval {
            removed,
            room_deleted,
        })
    }

    async fn save_message(&self, message: Arc<Message>) -> StoreResult<()> {
        self.messages.insert(message.id(), message);
        Ok(())
    }

    async fn find_room_messages(
        &self,
        key: &RoomKey,
        limit: usize,
        before: Option<u64>,
    ) -> StoreResult<Vec<Arc<Message>>> {
        let mut found =
            self.room_messages(key, |m| before.map_or(true, |cursor| m.created_at < cursor));
        let skip = found.len().saturating_sub(limit);
        Ok(found.split_off(skip))
    }

    async fn find_room_messages_since(
        &self,
        key: &RoomKey,
        since: u64,
    ) -> StoreResult<Vec<Arc<Message>>> {
        Ok(self.room_messages(key, |m| m.created_at > since))
    }

    async fn cleanup_old_messages(&self, days: u32) -> StoreResult<usize> {
        let cutoff = self.cutoff(days);
        let before = self.messages.len();
        self.messages.retain(|_, m| m.created_at >= cutoff);
        Ok(before.saturating_sub(self.messages.len()))
    }

    async fn save_delivery(&self, delivery: &Delivery) -> StoreResult<()> {
        self.deliveries.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn find_pending_deliveries(&self, session_id: &str) -> StoreResult<Vec<Delivery>> {
        let mut pending: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|d| d.is_pending() && d.connection == session_id)
            .map(|d| d.clone())
            .collect();
        pending.sort_by_key(|d| d.id);
        Ok(pending)
    }

    async fn cleanup_old_deliveries(&self, days: u32) -> StoreResult<usize> {
        let cutoff = self.cutoff(days);
        let before = self.deliveries.len();
        self.deliveries.retain(|_, d| d.created_at >= cutoff);
        Ok(before.saturating_sub(self.deliveries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::connection::TransportKind;
    use crate::delivery::DeliveryStatus;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(days_to_millis(30)));
        (clock.clone(), MemoryStore::new(clock))
    }

    #[tokio::test]
    async fn test_connection_lookup() {
        let (_, store) = store();
        let conn = Connection::new(TransportKind::Polling, 0).with_client_id("user-1");
        store.save_connection(&conn).await.unwrap();

        let found = store.find_by_session_id(&conn.session_id).await.unwrap();
        assert_eq!(found.as_ref(), Some(&conn));
        assert_eq!(store.find_by_client_id("user-1").await.unwrap().len(), 1);
        assert!(store.find_by_session_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_connections_by_namespace() {
        let (_, store) = store();
        let a = Connection::new(TransportKind::Polling, 0);
        let b = Connection::new(TransportKind::Polling, 1).with_namespace("/chat");
        let mut c = Connection::new(TransportKind::Polling, 2);
        c.connected = false;
        for conn in [&a, &b, &c] {
            store.save_connection(conn).await.unwrap();
        }

        assert_eq!(store.find_active_connections(None).await.unwrap().len(), 2);
        let chat = store.find_active_connections(Some("/chat")).await.unwrap();
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].session_id, b.session_id);
    }

    #[tokio::test]
    async fn test_cleanup_inactive_connections() {
        let (clock, store) = store();
        let now = clock.now_millis();

        let live = Connection::new(TransportKind::Polling, 0);
        let mut stale = Connection::new(TransportKind::Polling, 0);
        stale.connected = false;
        let mut recent = Connection::new(TransportKind::Polling, now);
        recent.connected = false;
        for conn in [&live, &stale, &recent] {
            store.save_connection(conn).await.unwrap();
        }

        let removed = store
            .cleanup_inactive_connections(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.find_by_session_id(&stale.session_id).await.unwrap().is_none());
        assert!(store.find_by_session_id(&live.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_membership_deletes_empty_room() {
        let (_, store) = store();
        let key = RoomKey::new("lobby", "/");

        assert!(store.add_member(&key, "s1").await.unwrap());
        assert!(!store.add_member(&key, "s1").await.unwrap());
        assert!(store.add_member(&key, "s2").await.unwrap());

        let removal = store.remove_member(&key, "s1").await.unwrap();
        assert_eq!(
            removal,
            MemberRemoval {
                removed: true,
                room_deleted: false
            }
        );

        let removal = store.remove_member(&key, "s2").await.unwrap();
        assert!(removal.removed && removal.room_deleted);
        assert!(store.find_room(&key).await.unwrap().is_none());

        let removal = store.remove_member(&key, "s2").await.unwrap();
        assert_eq!(removal, MemberRemoval::default());
    }

    #[tokio::test]
    async fn test_room_messages_window() {
        let (_, store) = store();
        let key = RoomKey::new("lobby", "/");
        for t in 1..=5 {
            let msg = Message::event("/", "tick", vec![], t * 10).with_rooms(vec![key.clone()]);
            store.save_message(Arc::new(msg)).await.unwrap();
        }
        let other = Message::event("/", "tick", vec![], 15).with_rooms(vec![RoomKey::new("x", "/")]);
        store.save_message(Arc::new(other)).await.unwrap();

        let since: Vec<u64> = store
            .find_room_messages_since(&key, 20)
            .await
            .unwrap()
            .iter()
            .map(|m| m.created_at)
            .collect();
        assert_eq!(since, vec![30, 40, 50]);

        let page: Vec<u64> = store
            .find_room_messages(&key, 2, Some(50))
            .await
            .unwrap()
            .iter()
            .map(|m| m.created_at)
            .collect();
        assert_eq!(page, vec![30, 40]);
    }

    #[tokio::test]
    async fn test_pending_deliveries_oldest_first() {
        let (_, store) = store();
        let message = Arc::new(Message::event("/", "chat", vec![], 0));

        let first = Delivery::new(message.clone(), "s1", 0);
        let mut second = Delivery::new(message.clone(), "s1", 0);
        let third = Delivery::new(message.clone(), "s1", 0);
        let other = Delivery::new(message, "s2", 0);
        second.status = DeliveryStatus::Delivered;
        for d in [&third, &other, &second, &first] {
            store.save_delivery(d).await.unwrap();
        }

        let ids: Vec<DeliveryId> = store
            .find_pending_deliveries("s1")
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![first.id, third.id]);
    }

    #[tokio::test]
    async fn test_retention_cleanup() {
        let (clock, store) = store();
        let now = clock.now_millis();
        let message = Arc::new(Message::event("/", "old", vec![], 0));
        store.save_message(message.clone()).await.unwrap();
        store
            .save_delivery(&Delivery::new(message.clone(), "s1", 0))
            .await
            .unwrap();
        store
            .save_delivery(&Delivery::new(message, "s1", now))
            .await
            .unwrap();

        assert_eq!(store.cleanup_old_deliveries(7).await.unwrap(), 1);
        assert_eq!(store.cleanup_old_messages(7).await.unwrap(), 1);
        assert_eq!(store.stats().delivery_count, 1);
    }
}
