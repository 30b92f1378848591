//! # relay-core
//!
//! Connections, rooms, delivery tracking and fan-out for the Relay
//! Socket.IO engine.
//!
//! This crate provides the stateful half of the engine:
//!
//! - **Connection** - Session records and the liveness check
//! - **Room** - Named member sets within a namespace
//! - **DeliveryQueue** - Per-room buffers and tracked, retried deliveries
//! - **MessageBroadcaster** - Fan-out to live connections
//! - **Heartbeat / Cleanup** - Periodic sweeps
//!
//! All shared state lives behind the [`Store`] trait; [`MemoryStore`] keeps
//! it in process.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Lifecycle  │────▶│ RoomManager │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                       ▲
//!        │            ┌─────────────┐            │
//!   Heartbeat ───────▶│ Broadcaster │────────────┤
//!                     └─────────────┘            │
//!                     ┌─────────────┐            │
//!                     │    Queue    │────────────┘
//!                     └─────────────┘
//! ```

pub mod broadcast;
pub mod cleanup;
pub mod clock;
pub mod connection;
pub mod daemon;
pub mod delivery;
pub mod events;
pub mod heartbeat;
pub mod lifecycle;
pub mod memory;
pub mod message;
pub mod queue;
pub mod room;
pub mod rooms;
pub mod store;

pub use broadcast::MessageBroadcaster;
pub use cleanup::{CleanupConfig, CleanupController, CleanupReport};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use connection::{Connection, TransportBinding, TransportKind};
pub use daemon::{run_daemon, SweepError};
pub use delivery::{Delivery, DeliveryId, DeliveryStatus, MAX_RETRIES};
pub use events::{ChannelDispatcher, EventDispatcher, NoopDispatcher, SharedDispatcher, SocketEvent};
pub use heartbeat::{HeartbeatConfig, HeartbeatController, HeartbeatReport};
pub use lifecycle::{ConnectionLifecycle, LifecycleError, StatusError, DEFAULT_PING_TIMEOUT};
pub use memory::MemoryStore;
pub use message::{Message, MessageId};
pub use queue::{DeliveryQueue, QueueCleanup, QueueConfig, QueueEntry};
pub use room::{Room, RoomKey};
pub use rooms::{RoomError, RoomManager};
pub use store::{SharedStore, Store, StoreError};
