//! Room membership management.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::connection::Connection;
use crate::room::{validate_room_name, Room, RoomKey};
use crate::store::{SharedStore, StoreError};

/// Room errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidName(&'static str),

    /// Room not found.
    #[error("Room not found: {0}")]
    NotFound(RoomKey),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Joins, leaves and looks up rooms.
#[derive(Debug, Clone)]
pub struct RoomManager {
    store: SharedStore,
}

impl RoomManager {
    /// Create a room manager.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Get a room by name and namespace, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the store fails.
    pub async fn find_or_create_room(&self, name: &str, namespace: &str) -> Result<Room, RoomError> {
        validate_room_name(name).map_err(RoomError::InvalidName)?;
        Ok(self.store.find_or_create_room(&RoomKey::new(name, namespace)).await?)
    }

    /// Look up a room without creating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn find_room(&self, name: &str, namespace: &str) -> Result<Option<Room>, RoomError> {
        Ok(self.store.find_room(&RoomKey::new(name, namespace)).await?)
    }

    /// Add a connection to a room in its namespace.
    ///
    /// Joining a room twice is a no-op. Returns `true` if the membership is
    /// new.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the store fails.
    pub async fn join_room(&self, connection: &Connection, name: &str) -> Result<bool, RoomError> {
        validate_room_name(name).map_err(RoomError::InvalidName)?;
        let key = RoomKey::new(name, &connection.namespace);
        let added = self.store.add_member(&key, &connection.session_id).await?;

        debug!(room = %key, session = %connection.session_id, added, "Joined room");
        Ok(added)
    }

    /// Remove a connection from a room, deleting the room once empty.
    ///
    /// Returns `true` if the connection was a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn leave_room(&self, connection: &Connection, name: &str) -> Result<bool, RoomError> {
        let key = RoomKey::new(name, &connection.namespace);
        let removal = self.store.remove_member(&key, &connection.session_id).await?;

        if removal.room_deleted {
            debug!(room = %key, "Deleted empty room");
        }
        Ok(removal.removed)
    }

    /// Remove a session from every room it belongs to.
    ///
    /// Returns the number of rooms left.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn leave_all_rooms(&self, session_id: &str) -> Result<usize, RoomError> {
        let rooms = self.store.find_rooms_by_connection(session_id).await?;
        let mut left = 0;
        for room in rooms {
            let removal = self.store.remove_member(&room.key, session_id).await?;
            if removal.removed {
                left += 1;
            }
            if removal.room_deleted {
                debug!(room = %room.key, "Deleted empty room");
            }
        }

        debug!(session = %session_id, rooms = left, "Left all rooms");
        Ok(left)
    }

    /// Rooms a session belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn rooms_of(&self, session_id: &str) -> Result<Vec<Room>, RoomError> {
        Ok(self.store.find_rooms_by_connection(session_id).await?)
    }

    /// Session ids of a room's members; empty if the room does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn members(&self, key: &RoomKey) -> Result<Vec<String>, RoomError> {
        Ok(self
            .store
            .find_room(key)
            .await?
            .map(|room| room.members().map(str::to_string).collect())
            .unwrap_or_default())
    }

    /// Set a metadata entry on an existing room.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or the store fails.
    pub async fn set_metadata(
        &self,
        key: &RoomKey,
        field: impl Into<String>,
        value: Value,
    ) -> Result<(), RoomError> {
        let mut room = self
            .store
            .find_room(key)
            .await?
            .ok_or_else(|| RoomError::NotFound(key.clone()))?;
        room.metadata.insert(field.into(), value);
        self.store.save_room(&room).await?;
        Ok(())
    }
}
