//! # catalog-relay
//!
//! Real-time notification relay for the library catalog.
//!
//! The business backend publishes one event per state change with a
//! one-shot `POST /update`; the relay fans it out to every subscriber
//! holding a WebSocket open on `/`, while a liveness monitor evicts dead
//! and idle connections. Delivery is best-effort and nothing is persisted.
//!
//! ## Architecture
//!
//! ```text
//! Backend ──POST /update──► Ingestion (api/)
//!                              │
//!                              ▼
//!                        BroadcastEngine (service/)
//!                              │
//!                              ▼
//!   LivenessMonitor ──► ConnectionRegistry (domain/) ◄── ConnectionAcceptor (ws/)
//!                              │                               ▲
//!                              ▼                               │
//!                        per-connection queue ──► socket ◄── Subscriber (client/)
//! ```

pub mod api;
pub mod app_state;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod service;
pub mod ws;
