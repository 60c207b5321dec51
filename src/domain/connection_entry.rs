//! Connection entry: one live subscriber and its liveness metadata.
//!
//! The entry owns a [`ConnectionHandle`], the only way anything outside the
//! connection task can reach the socket. Writes go through a bounded
//! outbound queue; a forced close goes through [`ConnectionHandle::terminate`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use super::ClientId;

/// Transport state of a subscriber channel, as seen by the broadcast engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Registered but the writer is not running yet; skipped by broadcasts.
    Connecting,
    /// Ready to receive frames.
    Open,
    /// The peer started a close handshake.
    Closing,
    /// Terminated; the connection task is gone or going.
    Closed,
}

impl ChannelState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A frame queued for a single subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame. Cloning shares the underlying buffer.
    Text(Utf8Bytes),
    /// Empty-payload ping used as a liveness probe.
    Ping,
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// The bounded queue is full: the client is not keeping up.
    #[error("outbound queue full")]
    Overflow,
    /// The connection task has exited.
    #[error("connection closed")]
    Closed,
}

#[derive(Debug)]
struct HandleShared {
    state: AtomicU8,
    terminate: Notify,
}

/// Cloneable write side of a subscriber connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<HandleShared>,
}

impl ConnectionHandle {
    /// Creates a handle in the [`ChannelState::Connecting`] state together
    /// with the receiving end of its bounded outbound queue.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            outbound,
            shared: Arc::new(HandleShared {
                state: AtomicU8::new(ChannelState::Connecting.as_u8()),
                terminate: Notify::new(),
            }),
        };
        (handle, rx)
    }

    /// Current transport state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Marks the channel open. No effect once closing or closed.
    pub fn mark_open(&self) {
        let _ = self.shared.state.compare_exchange(
            ChannelState::Connecting.as_u8(),
            ChannelState::Open.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Marks the channel as closing after the peer sent a close frame.
    pub fn mark_closing(&self) {
        let _ = self
            .shared
            .state
            .fetch_max(ChannelState::Closing.as_u8(), Ordering::AcqRel);
    }

    /// Queues a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendFailure::Overflow`] when the queue is full and
    /// [`SendFailure::Closed`] when the connection task has gone away.
    pub fn try_send(&self, frame: Outbound) -> Result<(), SendFailure> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Overflow,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Forcibly closes the channel, skipping the close handshake.
    ///
    /// Idempotent. Returns `true` only for the call that performed the
    /// transition to [`ChannelState::Closed`].
    pub fn terminate(&self) -> bool {
        let previous = self
            .shared
            .state
            .swap(ChannelState::Closed.as_u8(), Ordering::AcqRel);
        self.shared.terminate.notify_one();
        previous != ChannelState::Closed.as_u8()
    }

    /// `true` if both handles refer to the same underlying channel.
    #[must_use]
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        if self.state() == ChannelState::Closed {
            return;
        }
        self.shared.terminate.notified().await;
    }
}

/// Two-state liveness record, checked functionally by each sweep.
///
/// A connection is alive while no probe is outstanding; arming a probe
/// records when it was sent, and any acknowledgment clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// Last time any inbound data arrived (probe acknowledgments included).
    pub last_activity: Instant,
    /// When the outstanding probe was sent, if one is outstanding.
    pub awaiting_pong_since: Option<Instant>,
}

impl Liveness {
    /// Fresh record for a connection accepted at `now`.
    #[must_use]
    pub const fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            awaiting_pong_since: None,
        }
    }

    /// `true` when no probe is outstanding.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.awaiting_pong_since.is_none()
    }

    /// Records inbound activity.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = self.last_activity.max(now);
    }

    /// Records a probe acknowledgment.
    pub fn acknowledge(&mut self, now: Instant) {
        self.awaiting_pong_since = None;
        self.touch(now);
    }

    /// Records that a probe is being sent.
    pub fn arm(&mut self, now: Instant) {
        self.awaiting_pong_since = Some(now);
    }

    /// Time since the last inbound activity.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

/// Bookkeeping record for one live subscriber.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    id: ClientId,
    handle: ConnectionHandle,
    liveness: Liveness,
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

impl ConnectionEntry {
    /// Creates an entry for a connection accepted at `now`.
    #[must_use]
    pub fn new(
        id: ClientId,
        handle: ConnectionHandle,
        peer: Option<SocketAddr>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            handle,
            liveness: Liveness::new(now),
            peer,
            connected_at: Utc::now(),
        }
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Write side of the connection.
    #[must_use]
    pub const fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Liveness snapshot.
    #[must_use]
    pub const fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub(crate) fn liveness_mut(&mut self) -> &mut Liveness {
        &mut self.liveness
    }

    /// Remote address, when known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Wall-clock accept time.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn handle_starts_connecting_then_opens() {
        let (handle, _rx) = ConnectionHandle::channel(4);
        assert_eq!(handle.state(), ChannelState::Connecting);
        handle.mark_open();
        assert_eq!(handle.state(), ChannelState::Open);
    }

    #[test]
    fn mark_open_does_not_revive_closed_channel() {
        let (handle, _rx) = ConnectionHandle::channel(4);
        handle.terminate();
        handle.mark_open();
        assert_eq!(handle.state(), ChannelState::Closed);
    }

    #[test]
    fn closing_never_downgrades_closed() {
        let (handle, _rx) = ConnectionHandle::channel(4);
        handle.mark_open();
        handle.mark_closing();
        assert_eq!(handle.state(), ChannelState::Closing);
        handle.terminate();
        handle.mark_closing();
        assert_eq!(handle.state(), ChannelState::Closed);
    }

    #[test]
    fn terminate_is_idempotent() {
        let (handle, _rx) = ConnectionHandle::channel(4);
        assert!(handle.terminate());
        assert!(!handle.terminate());
    }

    #[test]
    fn clones_share_a_channel() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        let (other, _other_rx) = ConnectionHandle::channel(1);
        assert!(handle.same_channel(&handle.clone()));
        assert!(!handle.same_channel(&other));
    }

    #[test]
    fn full_queue_reports_overflow() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        assert_eq!(handle.try_send(Outbound::Ping), Ok(()));
        assert_eq!(handle.try_send(Outbound::Ping), Err(SendFailure::Overflow));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (handle, rx) = ConnectionHandle::channel(1);
        drop(rx);
        assert_eq!(handle.try_send(Outbound::Ping), Err(SendFailure::Closed));
    }

    #[tokio::test]
    async fn terminated_resolves_after_terminate() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.terminated().await });
        handle.terminate();
        let joined = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[test]
    fn liveness_cycle() {
        let t0 = Instant::now();
        let mut liveness = Liveness::new(t0);
        assert!(liveness.is_alive());
        liveness.arm(t0 + Duration::from_secs(30));
        assert!(!liveness.is_alive());
        liveness.acknowledge(t0 + Duration::from_secs(31));
        assert!(liveness.is_alive());
        assert_eq!(
            liveness.idle_for(t0 + Duration::from_secs(40)),
            Duration::from_secs(9)
        );
    }
}
