//! # relay-transport
//!
//! Transport layer for the Relay realtime engine.
//!
//! Transports move Engine.IO payloads between the HTTP layer and the core:
//!
//! - **Polling** - HTTP long-polling, the only built-in transport
//! - **Registry** - maps the `transport` query parameter to a constructor
//!
//! ## Transport Abstraction
//!
//! All transports implement the [`Transport`] trait, so the HTTP handlers
//! only deal with request bodies and response payloads.
//!
//! ```rust,ignore
//! use relay_protocol::PayloadProcessor;
//! use tenvis_relay_transport::Transport;
//!
//! async fn serve(transport: &dyn Transport, connection: &Connection) {
//!     let body = transport.poll(connection, &PayloadProcessor::new()).await?;
//!     // Write body to the HTTP response
//! }
//! ```

pub mod polling;
pub mod registry;
pub mod traits;

pub use polling::PollingTransport;
pub use registry::{TransportFactory, TransportRegistry};
pub use traits::{PacketHandler, PollingConfig, Transport, TransportContext, TransportError};
