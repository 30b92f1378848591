//! Persistence interface.
//!
//! Connections, rooms, messages, and deliveries are the only state shared
//! between request workers. Every mutation goes straight to the store, so
//! concurrent pollers for one session rely on the store serialising writes.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::connection::Connection;
use crate::delivery::Delivery;
use crate::message::Message;
use crate::room::{Room, RoomKey};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Storage result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of removing a member from a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberRemoval {
    /// The session was a member and has been removed.
    pub removed: bool,
    /// The room became empty and was deleted.
    pub room_deleted: bool,
}

/// Persistence collaborator.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Insert or replace a connection record.
    async fn save_connection(&self, connection: &Connection) -> StoreResult<()>;

    /// Find a connection by session id.
    async fn find_by_session_id(&self, session_id: &str) -> StoreResult<Option<Connection>>;

    /// Find all connections carrying an application-level id.
    async fn find_by_client_id(&self, client_id: &str) -> StoreResult<Vec<Connection>>;

    /// Find connected records, optionally restricted to one namespace.
    async fn find_active_connections(&self, namespace: Option<&str>)
        -> StoreResult<Vec<Connection>>;

    /// Delete disconnected records idle for longer than `inactive_for`.
    async fn cleanup_inactive_connections(&self, inactive_for: Duration) -> StoreResult<usize>;

    /// Find a room by name and namespace.
    async fn find_room(&self, key: &RoomKey) -> StoreResult<Option<Room>>;

    /// Get a room, creating it empty if missing.
    async fn find_or_create_room(&self, key: &RoomKey) -> StoreResult<Room>;

    /// Insert or replace a room.
    async fn save_room(&self, room: &Room) -> StoreResult<()>;

    /// Rooms that list `session_id` as a member.
    async fn find_rooms_by_connection(&self, session_id: &str) -> StoreResult<Vec<Room>>;

    /// Add a member, creating the room if needed. Returns `true` if the
    /// session was not already a member.
    async fn add_member(&self, key: &RoomKey, session_id: &str) -> StoreResult<bool>;

    /// Remove a member, deleting the room if it becomes empty.
    async fn remove_member(&self, key: &RoomKey, session_id: &str) -> StoreResult<MemberRemoval>;

    /// Persist a message.
    async fn save_message(&self, message: Arc<Message>) -> StoreResult<()>;

    /// Up to `limit` most recent messages for a room created before
    /// `before`, oldest first.
    async fn find_room_messages(
        &self,
        key: &RoomKey,
        limit: usize,
        before: Option<u64>,
    ) -> StoreResult<Vec<Arc<Message>>>;

    /// Messages for a room created strictly after `since`, oldest first.
    async fn find_room_messages_since(
        &self,
        key: &RoomKey,
        since: u64,
    ) -> StoreResult<Vec<Arc<Message>>>;

    /// Delete messages older than `days` days.
    async fn cleanup_old_messages(&self, days: u32) -> StoreResult<usize>;

    /// Insert or replace a delivery.
    async fn save_delivery(&self, delivery: &Delivery) -> StoreResult<()>;

    /// Pending deliveries for a session, oldest first.
    async fn find_pending_deliveries(&self, session_id: &str) -> StoreResult<Vec<Delivery>>;

    /// Delete deliveries older than `days` days.
    async fn cleanup_old_deliveries(&self, days: u32) -> StoreResult<usize>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn Store>;
