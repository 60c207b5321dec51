//! Domain layer: subscriber identity, connection entries, events, and the
//! connection registry.
//!
//! This module contains the relay's in-memory model. Nothing here is
//! persisted: a restart drops every subscription.

pub mod client_id;
pub mod connection_entry;
pub mod event;
pub mod registry;

pub use client_id::ClientId;
pub use connection_entry::{
    ChannelState, ConnectionEntry, ConnectionHandle, Liveness, Outbound, SendFailure,
};
pub use event::Event;
pub use registry::{ConnectionRegistry, ProbeArm};
