//! Service layer: event fan-out and connection supervision.
//!
//! [`BroadcastEngine`] delivers published events to every registered
//! subscriber; [`LivenessMonitor`] probes and evicts dead or idle ones.
//! Both operate on the shared [`crate::domain::ConnectionRegistry`].

pub mod broadcast;
pub mod liveness;

pub use broadcast::{BroadcastEngine, BroadcastReport};
pub use liveness::{LivenessMonitor, MonitorHandle, SweepReport};
