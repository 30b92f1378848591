//! Transport negotiation.
//!
//! Maps transport kinds to constructors, so adding a transport means
//! registering it rather than editing the request handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tenvis_relay_core::TransportKind;

use crate::polling::PollingTransport;
use crate::traits::{Transport, TransportContext, TransportError};

/// Builds a transport from the shared context.
pub type TransportFactory = Arc<dyn Fn(&TransportContext) -> Arc<dyn Transport> + Send + Sync>;

/// Registered transports by kind.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<TransportKind, TransportFactory>,
}

impl TransportRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in polling transport.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TransportKind::Polling, |ctx| {
            Arc::new(PollingTransport::new(ctx.clone()))
        });
        registry
    }

    /// Register a constructor, replacing any previous one for `kind`.
    pub fn register<F>(&mut self, kind: TransportKind, factory: F)
    where
        F: Fn(&TransportContext) -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Whether `kind` is registered.
    #[must_use]
    pub fn supports(&self, kind: TransportKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Resolve the `transport` query parameter. A missing parameter means
    /// polling.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`] for unknown or unregistered
    /// kinds.
    pub fn negotiate(&self, requested: Option<&str>) -> Result<TransportKind, TransportError> {
        let name = requested.unwrap_or(TransportKind::Polling.as_str());
        let kind: TransportKind = name
            .parse()
            .map_err(|_| TransportError::Unsupported(name.to_string()))?;

        if self.supports(kind) {
            Ok(kind)
        } else {
            Err(TransportError::Unsupported(name.to_string()))
        }
    }

    /// Build the transport for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`] if `kind` is not registered.
    pub fn create(
        &self,
        kind: TransportKind,
        ctx: &TransportContext,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        self.factories
            .get(&kind)
            .map(|factory| factory(ctx))
            .ok_or_else(|| TransportError::Unsupported(kind.to_string()))
    }

    /// Build one transport per registered kind.
    #[must_use]
    pub fn create_all(&self, ctx: &TransportContext) -> HashMap<TransportKind, Arc<dyn Transport>> {
        self.factories
            .iter()
            .map(|(kind, factory)| (*kind, factory(ctx)))
            .collect()
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{PacketHandler, PollingConfig};
    use async_trait::async_trait;
    use relay_protocol::SocketPacket;
    use tenvis_relay_core::{
        Connection, ConnectionLifecycle, DeliveryQueue, MemoryStore, NoopDispatcher, QueueConfig,
        RoomManager, SharedClock, SharedStore, SystemClock,
    };

    #[derive(Debug)]
    struct IgnoreHandler;

    #[async_trait]
    impl PacketHandler for IgnoreHandler {
        async fn handle(
            &self,
            _connection: &mut Connection,
            _packet: SocketPacket,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn context() -> TransportContext {
        let clock: SharedClock = Arc::new(SystemClock);
        let store: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
        TransportContext {
            queue: Arc::new(DeliveryQueue::new(
                store.clone(),
                clock.clone(),
                QueueConfig::default(),
            )),
            lifecycle: ConnectionLifecycle::new(
                store.clone(),
                RoomManager::new(store.clone()),
                Arc::new(NoopDispatcher),
                clock.clone(),
            ),
            store,
            handler: Arc::new(IgnoreHandler),
            clock,
            config: PollingConfig::default(),
        }
    }

    #[test]
    fn test_negotiate() {
        let registry = TransportRegistry::with_defaults();
        assert_eq!(registry.negotiate(None).unwrap(), TransportKind::Polling);
        assert_eq!(
            registry.negotiate(Some("polling")).unwrap(),
            TransportKind::Polling
        );
        assert!(matches!(
            registry.negotiate(Some("websocket")),
            Err(TransportError::Unsupported(name)) if name == "websocket"
        ));

        let empty = TransportRegistry::new();
        assert!(matches!(
            empty.negotiate(None),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[test]
    fn test_create() {
        let ctx = context();
        let registry = TransportRegistry::with_defaults();

        let transport = registry.create(TransportKind::Polling, &ctx).unwrap();
        assert_eq!(transport.kind(), TransportKind::Polling);
        assert!(transport.upgrades().is_empty());

        let all = registry.create_all(&ctx);
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&TransportKind::Polling));

        assert!(TransportRegistry::new()
            .create(TransportKind::Polling, &ctx)
            .is_err());
    }
}
