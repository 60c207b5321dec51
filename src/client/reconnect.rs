//! Reconnection state machine for a single logical subscription.
//!
//! [`ReconnectController`] is pure: it consumes transport events and
//! returns the [`Action`]s the driver must perform. It owns at most one
//! pending retry, identified by a [`RetryToken`], so a stale timer can
//! never trigger a second concurrent connection attempt.

use std::time::Duration;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling applied to every delay.
    pub max_delay: Duration,
    /// Automatic retries allowed before giving up.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay for the retry scheduled after `attempt` previous failures:
    /// `min(base × 2^attempt, max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000), 5)
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Normal closure; no retry.
    Clean,
    /// Transport error or unexpected close.
    Abnormal,
}

/// Connection state as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not started.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Upgraded and receiving.
    Open,
    /// Not connected; a retry may be pending after an abnormal close.
    Closed(CloseKind),
}

/// Identifies one scheduled retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryToken(u64);

/// Side effect requested by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a new transport connection.
    Connect,
    /// Start a timer; call [`ReconnectController::retry_elapsed`] with the
    /// token when it fires.
    ScheduleRetry {
        /// Token to hand back when the timer fires.
        token: RetryToken,
        /// How long to wait.
        delay: Duration,
    },
    /// Cancel the timer previously scheduled with this token.
    CancelRetry(RetryToken),
    /// Refresh consumer data after an inbound message.
    Refresh,
    /// Close the open transport with a normal closure code.
    CloseNormally,
}

/// Snapshot of the controller for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Current state.
    pub state: LinkState,
    /// Consecutive failed attempts since the last successful open.
    pub attempts: u32,
}

impl LinkStatus {
    /// `true` while the subscription is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }
}

/// Explicit state machine for one logical subscription.
#[derive(Debug)]
pub struct ReconnectController {
    policy: BackoffPolicy,
    state: LinkState,
    attempts: u32,
    pending: Option<RetryToken>,
    next_token: u64,
    torn_down: bool,
}

impl ReconnectController {
    /// Creates an idle controller.
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: LinkState::Idle,
            attempts: 0,
            pending: None,
            next_token: 0,
            torn_down: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Consecutive failures since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The retry currently scheduled, if any.
    #[must_use]
    pub const fn pending_retry(&self) -> Option<RetryToken> {
        self.pending
    }

    /// `true` once [`teardown`](Self::teardown) has run.
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Current status snapshot.
    #[must_use]
    pub const fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            attempts: self.attempts,
        }
    }

    /// `Idle → Connecting` on mount.
    pub fn start(&mut self) -> Vec<Action> {
        if self.torn_down || self.state != LinkState::Idle {
            return Vec::new();
        }
        self.state = LinkState::Connecting;
        vec![Action::Connect]
    }

    /// Manually reinitiates the subscription after it closed, resetting
    /// the attempt count. Ignored while connecting or open.
    pub fn reconnect(&mut self) -> Vec<Action> {
        if self.torn_down || matches!(self.state, LinkState::Connecting | LinkState::Open) {
            return Vec::new();
        }
        let mut actions = self.cancel_pending();
        self.attempts = 0;
        self.state = LinkState::Connecting;
        actions.push(Action::Connect);
        actions
    }

    /// `Connecting → Open`; resets the attempt count.
    pub fn on_open(&mut self) -> Vec<Action> {
        if self.torn_down || self.state != LinkState::Connecting {
            return Vec::new();
        }
        self.state = LinkState::Open;
        self.attempts = 0;
        tracing::debug!("subscription open");
        Vec::new()
    }

    /// An application message arrived. Requests a refresh while open;
    /// never changes state.
    pub fn on_message(&mut self) -> Vec<Action> {
        if !self.torn_down && self.state == LinkState::Open {
            vec![Action::Refresh]
        } else {
            Vec::new()
        }
    }

    /// The transport closed with the given kind.
    pub fn on_close(&mut self, kind: CloseKind) -> Vec<Action> {
        if self.torn_down || !matches!(self.state, LinkState::Connecting | LinkState::Open) {
            return Vec::new();
        }
        match kind {
            CloseKind::Clean => {
                self.state = LinkState::Closed(CloseKind::Clean);
                tracing::debug!("subscription closed cleanly");
                Vec::new()
            }
            CloseKind::Abnormal => self.fail(),
        }
    }

    /// The transport reported an error.
    pub fn on_error(&mut self) -> Vec<Action> {
        self.on_close(CloseKind::Abnormal)
    }

    /// The timer for `token` fired. Ignored unless it is the pending retry.
    pub fn retry_elapsed(&mut self, token: RetryToken) -> Vec<Action> {
        if self.torn_down || self.pending != Some(token) {
            return Vec::new();
        }
        self.pending = None;
        self.state = LinkState::Connecting;
        vec![Action::Connect]
    }

    /// Consumer unmount: cancels any pending retry, closes an open
    /// transport normally, and ignores every later event.
    pub fn teardown(&mut self) -> Vec<Action> {
        if self.torn_down {
            return Vec::new();
        }
        let mut actions = self.cancel_pending();
        if self.state == LinkState::Open {
            actions.push(Action::CloseNormally);
        }
        self.torn_down = true;
        self.state = LinkState::Closed(CloseKind::Clean);
        actions
    }

    fn fail(&mut self) -> Vec<Action> {
        self.state = LinkState::Closed(CloseKind::Abnormal);
        if self.attempts >= self.policy.max_attempts {
            tracing::warn!(
                attempts = self.attempts,
                "maximum reconnection attempts reached"
            );
            return Vec::new();
        }

        let mut actions = self.cancel_pending();
        let delay = self.policy.delay_for(self.attempts);
        let token = RetryToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        self.pending = Some(token);
        self.attempts += 1;
        tracing::info!(
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        actions.push(Action::ScheduleRetry { token, delay });
        actions
    }

    fn cancel_pending(&mut self) -> Vec<Action> {
        self.pending
            .take()
            .map(Action::CancelRetry)
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn scheduled(actions: &[Action]) -> Option<(RetryToken, Duration)> {
        actions.iter().find_map(|a| match a {
            Action::ScheduleRetry { token, delay } => Some((*token, *delay)),
            _ => None,
        })
    }

    #[test]
    fn delays_double_up_to_ceiling() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u128> = (0..7).map(|a| policy.delay_for(a).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
        assert_eq!(policy.delay_for(64), Duration::from_millis(30_000));
    }

    #[test]
    fn five_abnormal_closes_schedule_exactly_five_retries() {
        let mut controller = ReconnectController::new(BackoffPolicy::default());
        assert_eq!(controller.start(), vec![Action::Connect]);

        let mut delays = Vec::new();
        for _ in 0..5 {
            let actions = controller.on_close(CloseKind::Abnormal);
            let Some((token, delay)) = scheduled(&actions) else {
                panic!("expected a retry to be scheduled");
            };
            delays.push(delay.as_millis());
            assert_eq!(controller.retry_elapsed(token), vec![Action::Connect]);
            assert_eq!(controller.state(), LinkState::Connecting);
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

        assert!(controller.on_close(CloseKind::Abnormal).is_empty());
        assert_eq!(controller.state(), LinkState::Closed(CloseKind::Abnormal));
        assert_eq!(controller.pending_retry(), None);
    }

    #[test]
    fn successful_open_resets_attempts() {
        let mut controller = ReconnectController::new(BackoffPolicy::default());
        controller.start();
        let Some((token, _)) = scheduled(&controller.on_error()) else {
            panic!("expected retry");
        };
        controller.retry_elapsed(token);
        let Some((token, delay)) = scheduled(&controller.on_error()) else {
            panic!("expected retry");
        };
        assert_eq!(delay, Duration::from_millis(2000));
        controller.retry_elapsed(token);

        assert!(controller.on_open().is_empty());
        assert_eq!(controller.attempts(), 0);

        let Some((_, delay)) = scheduled(&controller.on_close(CloseKind::Abnormal)) else {
            panic!("expected retry");
        };
        assert_eq!(delay, Duration::from_millis(1000));
    }

    #[test]
    fn clean_close_schedules_nothing() {
        let mut controller = ReconnectController::new(BackoffPolicy::default());
        controller.start();
        controller.on_open();
        assert!(controller.on_close(CloseKind::Clean).is_empty());
        assert_eq!(controller.state(), LinkState::Closed(CloseKind::Clean));
        assert_eq!(controller.pending_retry(), None);
    }

    #[test]
    fn error_then_close_schedules_a_single_retry() {
        let mut controller = ReconnectController::new(BackoffPolicy::default());
        controller.start();
        controller.on_open();
        assert!(scheduled(&controller.on_error()).is_some());
        assert!(controller.on_close(CloseKind::Abnormal).is_empty());
        assert_eq!(controller.attempts(), 1);
    }

    #[test]
    fn stale_timer_is_ignored() {
        let mut controller = ReconnectController::new(BackoffPolicy::default());
        controller.start();
        let Some((stale, _)) = scheduled(&controller.on_error()) else {
            panic!("expected retry");
        };

        let actions = controller.reconnect();
        assert_eq!(actions, vec![Action::CancelRetry(stale), Action::Connect]);
        assert!(controller.retry_elapsed(stale).is_empty());
        assert_eq!(controller.state(), LinkState::Connecting);
    }

    #[test]
    fn messages_refresh_only_while_open() {
        let mut controller = ReconnectController::new(BackoffPolicy::default());
        assert!(controller.on_message().is_empty());
        controller.start();
        assert!(controller.on_message().is_empty());
        controller.on_open();
        assert_eq!(controller.on_message(), vec![Action::Refresh]);
        assert_eq!(controller.state(), LinkState::Open);
    }

    #[test]
    fn teardown_while_open_closes_normally() {
        let mut controller = ReconnectController::new(BackoffPolicy::default());
        controller.start();
        controller.on_open();
        assert_eq!(controller.teardown(), vec![Action::CloseNormally]);
        assert!(controller.is_torn_down());
    }

    #[test]
    fn teardown_cancels_pending_retry_and_silences_events() {
        let mut controller = ReconnectController::new(BackoffPolicy::default());
        controller.start();
        let Some((token, _)) = scheduled(&controller.on_error()) else {
            panic!("expected retry");
        };

        assert_eq!(controller.teardown(), vec![Action::CancelRetry(token)]);
        assert!(controller.retry_elapsed(token).is_empty());
        assert!(controller.on_open().is_empty());
        assert!(controller.on_error().is_empty());
        assert!(controller.on_message().is_empty());
        assert!(controller.reconnect().is_empty());
        assert!(controller.teardown().is_empty());
    }

    #[test]
    fn manual_reconnect_after_giving_up() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 1);
        let mut controller = ReconnectController::new(policy);
        controller.start();
        let Some((token, _)) = scheduled(&controller.on_error()) else {
            panic!("expected retry");
        };
        controller.retry_elapsed(token);
        assert!(controller.on_error().is_empty());

        assert_eq!(controller.reconnect(), vec![Action::Connect]);
        assert_eq!(controller.attempts(), 0);
        assert!(scheduled(&controller.on_error()).is_some());
    }
}
