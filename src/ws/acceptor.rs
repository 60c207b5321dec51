//! Connection acceptor: turns a completed upgrade into a registry entry.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::messages::ServerMessage;
use crate::domain::{ClientId, ConnectionEntry, ConnectionHandle, ConnectionRegistry, Outbound};

/// A freshly registered connection, ready for its read/write loop.
#[derive(Debug)]
pub struct AcceptedConnection {
    /// Identifier assigned at accept time.
    pub id: ClientId,
    /// Write side, shared with the registry entry.
    pub handle: ConnectionHandle,
    /// Receiving end of the outbound queue, drained by the connection task.
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Creates and registers connection entries. Performs no authentication.
#[derive(Debug, Clone)]
pub struct ConnectionAcceptor {
    registry: Arc<ConnectionRegistry>,
    queue_capacity: usize,
}

impl ConnectionAcceptor {
    /// Creates an acceptor whose connections get `queue_capacity`-deep
    /// outbound queues.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, queue_capacity: usize) -> Self {
        Self {
            registry,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Registers a new connection with a fresh id and queues the
    /// `connection_established` message.
    pub fn accept(&self, peer: Option<SocketAddr>) -> AcceptedConnection {
        let id = ClientId::new();
        let (handle, outbound) = ConnectionHandle::channel(self.queue_capacity);
        self.registry
            .register(ConnectionEntry::new(id, handle.clone(), peer, Instant::now()));
        handle.mark_open();

        match serde_json::to_string(&ServerMessage::established(id)) {
            Ok(welcome) => {
                if let Err(failure) = handle.try_send(Outbound::Text(Utf8Bytes::from(welcome))) {
                    tracing::warn!(client_id = %id, %failure, "could not queue welcome message");
                }
            }
            Err(error) => tracing::warn!(client_id = %id, %error, "could not encode welcome message"),
        }

        tracing::info!(
            client_id = %id,
            peer = ?peer,
            connections = self.registry.len(),
            "client connected"
        );
        AcceptedConnection {
            id,
            handle,
            outbound,
        }
    }
}
