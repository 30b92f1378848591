//! Room abstraction for Relay.
//!
//! Rooms are named groups of connections within a namespace. A room owns
//! its member set; it is created on first join and removed when its last
//! member leaves.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// Composite room identifier: name plus namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomKey {
    /// Room name.
    pub name: String,
    /// Socket.IO namespace.
    pub namespace: String,
}

impl RoomKey {
    /// Create a room key.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.namespace, self.name)
    }
}

/// A room of connections, identified by session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Room key.
    pub key: RoomKey,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
    /// Member session ids.
    members: HashSet<String>,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(key: RoomKey, now: u64) -> Self {
        Self {
            key,
            metadata: HashMap::new(),
            members: HashSet::new(),
            created_at: now,
        }
    }

    /// Room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Room namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    /// Add a member. Returns `true` if it was not already present.
    pub fn add_member(&mut self, session_id: impl Into<String>) -> bool {
        self.members.insert(session_id.into())
    }

    /// Remove a member. Returns `true` if it was present.
    pub fn remove_member(&mut self, session_id: &str) -> bool {
        self.members.remove(session_id)
    }

    /// Check membership.
    #[must_use]
    pub fn has_member(&self, session_id: &str) -> bool {
        self.members.contains(session_id)
    }

    /// Number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Iterate member session ids.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Whether the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_creation() {
        let room = Room::new(RoomKey::new("lobby", "/"), 0);
        assert_eq!(room.name(), "lobby");
        assert_eq!(room.namespace(), "/");
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_membership() {
        let mut room = Room::new(RoomKey::new("lobby", "/"), 0);

        assert!(room.add_member("s1"));
        assert!(!room.add_member("s1"));
        assert!(room.add_member("s2"));
        assert_eq!(room.member_count(), 2);

        assert!(room.remove_member("s1"));
        assert!(!room.remove_member("s1"));
        assert!(!room.has_member("s1"));
        assert!(room.has_member("s2"));
    }

    #[test]
    fn test_room_name_validation() {
        assert!(validate_room_name("game:42").is_ok());
        assert!(validate_room_name("").is_err());
        assert!(validate_room_name("bad\nname").is_err());

        let long_name = "a".repeat(MAX_ROOM_NAME_LENGTH + 1);
        assert!(validate_room_name(&long_name).is_err());
    }

    #[test]
    fn test_room_key_display() {
        assert_eq!(RoomKey::new("lobby", "/chat").to_string(), "/chat#lobby");
    }
}
