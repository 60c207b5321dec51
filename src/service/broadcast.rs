//! Broadcast engine: fans one event out to every registered subscriber.

use std::sync::Arc;

use crate::domain::{
    ChannelState, ConnectionEntry, ConnectionRegistry, Event, Outbound, SendFailure,
};
use crate::error::RelayError;

/// Per-round delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Entries the frame was queued for.
    pub delivered: usize,
    /// Entries still connecting, left registered and skipped.
    pub skipped: usize,
    /// Entries already closing or closed, unregistered without a send.
    pub pruned: usize,
    /// Entries whose send failed (queue overflow or dead task), force-closed.
    pub failed: usize,
}

/// Best-effort, at-most-once fan-out over the [`ConnectionRegistry`].
///
/// Sends never block: each frame is pushed onto the subscriber's bounded
/// queue, so a slow client cannot stall delivery to the others. A full
/// queue is handled like any other send failure and closes that client.
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastEngine {
    /// Creates an engine over the given registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serializes `event` once and queues it for every open subscriber.
    ///
    /// Returns once every send has been issued; delivery itself happens
    /// on each connection's own task.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] if the event cannot be encoded.
    /// Per-client failures are never returned: they only prune that client.
    pub fn broadcast(&self, event: &Event) -> Result<BroadcastReport, RelayError> {
        let frame = event.to_frame()?;
        let mut report = BroadcastReport::default();

        self.registry.for_each(|entry| {
            self.deliver(entry, Outbound::Text(frame.clone()), &mut report);
        });

        tracing::debug!(
            kind = event.kind().unwrap_or("-"),
            delivered = report.delivered,
            skipped = report.skipped,
            pruned = report.pruned,
            failed = report.failed,
            "broadcast round complete"
        );
        Ok(report)
    }

    fn deliver(&self, entry: &ConnectionEntry, frame: Outbound, report: &mut BroadcastReport) {
        let client_id = entry.id();
        match entry.handle().state() {
            ChannelState::Open => match entry.handle().try_send(frame) {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    match failure {
                        SendFailure::Overflow => {
                            tracing::warn!(%client_id, "outbound queue full, closing slow client");
                        }
                        SendFailure::Closed => {
                            tracing::warn!(%client_id, "send failed, closing client");
                        }
                    }
                    self.registry.unregister_channel(client_id, entry.handle());
                    report.failed += 1;
                }
            },
            ChannelState::Connecting => report.skipped += 1,
            ChannelState::Closing | ChannelState::Closed => {
                if self.registry.unregister_channel(client_id, entry.handle()) {
                    tracing::debug!(%client_id, "pruned closing client");
                }
                report.pruned += 1;
            }
        }
    }
}
