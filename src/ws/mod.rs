//! WebSocket layer: upgrade handling, connection acceptance, and the
//! per-connection read/write loop.
//!
//! The subscribe endpoint at `/` is push-only: after the
//! `connection_established` message the relay only forwards broadcast
//! events and probes, and only reads probe acknowledgments.

pub mod acceptor;
pub mod connection;
pub mod handler;
pub mod messages;

pub use acceptor::{AcceptedConnection, ConnectionAcceptor};
