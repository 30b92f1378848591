//! Message fan-out to live connections.
//!
//! Broadcasts and room sends only reach connections that are connected at
//! the time of the send. A disconnected target is skipped without recording
//! a delivery; store-and-forward for offline sockets goes through
//! [`DeliveryQueue::enqueue`](crate::queue::DeliveryQueue::enqueue).

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::connection::Connection;
use crate::delivery::Delivery;
use crate::events::SharedDispatcher;
use crate::message::Message;
use crate::room::RoomKey;
use crate::store::{SharedStore, StoreResult};

/// Routes messages to connections.
#[derive(Debug, Clone)]
pub struct MessageBroadcaster {
    store: SharedStore,
    dispatcher: SharedDispatcher,
    clock: SharedClock,
}

impl MessageBroadcaster {
    /// Create a broadcaster.
    #[must_use]
    pub fn new(store: SharedStore, dispatcher: SharedDispatcher, clock: SharedClock) -> Self {
        Self {
            store,
            dispatcher,
            clock,
        }
    }

    /// Send an event to every connected socket except the sender.
    ///
    /// Returns the number of sockets reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn broadcast(
        &self,
        event: &str,
        args: Vec<Value>,
        sender: Option<&Connection>,
    ) -> StoreResult<usize> {
        let namespace = sender.map_or(relay_protocol::DEFAULT_NAMESPACE, |s| s.namespace.as_str());
        let message = Arc::new(self.message(namespace, event, args, sender));
        self.store.save_message(message.clone()).await?;

        let mut reached = 0;
        for target in self.store.find_active_connections(None).await? {
            if self.dispatch_message_to_socket(&message, &target).await? {
                reached += 1;
            }
        }

        debug!(event = %event, reached, "Broadcast");
        Ok(reached)
    }

    /// Send an event to the members of `rooms` in `namespace`.
    ///
    /// Members of several rooms receive the message once. Rooms that do not
    /// exist contribute nobody. Returns the number of sockets reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn send_to_rooms(
        &self,
        rooms: &[String],
        namespace: &str,
        event: &str,
        args: Vec<Value>,
        sender: Option<&Connection>,
    ) -> StoreResult<usize> {
        let keys: Vec<RoomKey> = rooms
            .iter()
            .map(|name| RoomKey::new(name.as_str(), namespace))
            .collect();

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for key in &keys {
            if let Some(room) = self.store.find_room(key).await? {
                for member in room.members() {
                    if sender.map_or(false, |s| s.session_id == member) {
                        continue;
                    }
                    if seen.insert(member.to_string()) {
                        targets.push(member.to_string());
                    }
                }
            }
        }
        // Room member sets are unordered
        targets.sort();

        let message = Arc::new(self.message(namespace, event, args, sender).with_rooms(keys));
        self.store.save_message(message.clone()).await?;

        let mut reached = 0;
        for session_id in targets {
            let Some(target) = self.store.find_by_session_id(&session_id).await? else {
                continue;
            };
            if self.dispatch_message_to_socket(&message, &target).await? {
                reached += 1;
            }
        }

        debug!(event = %event, rooms = rooms.len(), reached, "Sent to rooms");
        Ok(reached)
    }

    /// Deliver a message to one socket.
    ///
    /// Does nothing and returns `false` if the target is disconnected or is
    /// the sender. Otherwise records a pending delivery, dispatches the event
    /// and returns `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn dispatch_message_to_socket(
        &self,
        message: &Arc<Message>,
        target: &Connection,
    ) -> StoreResult<bool> {
        if !target.connected {
            trace!(session = %target.session_id, "Dropped message for disconnected socket");
            return Ok(false);
        }
        if message.sender.as_deref() == Some(target.session_id.as_str()) {
            return Ok(false);
        }

        let delivery = Delivery::new(
            Arc::clone(message),
            &target.session_id,
            self.clock.now_millis(),
        );
        self.store.save_delivery(&delivery).await?;
        self.dispatcher
            .dispatch(&message.event, target, &Value::Array(message.args.clone()));
        Ok(true)
    }

    fn message(
        &self,
        namespace: &str,
        event: &str,
        args: Vec<Value>,
        sender: Option<&Connection>,
    ) -> Message {
        let message = Message::event(namespace, event, args, self.clock.now_millis());
        match sender {
            Some(sender) => message.with_sender(&sender.session_id),
            None => message,
        }
    }
}
