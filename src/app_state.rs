//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::domain::ConnectionRegistry;
use crate::service::BroadcastEngine;
use crate::ws::ConnectionAcceptor;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry of live subscriber connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out used by the ingestion endpoint.
    pub broadcaster: BroadcastEngine,
    /// Registers upgraded connections.
    pub acceptor: ConnectionAcceptor,
}

impl AppState {
    /// Builds the state around a fresh, empty registry.
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: BroadcastEngine::new(Arc::clone(&registry)),
            acceptor: ConnectionAcceptor::new(
                Arc::clone(&registry),
                config.outbound_queue_capacity,
            ),
            registry,
        }
    }
}
