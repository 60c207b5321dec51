//! WebSocket subscriber with automatic reconnection.
//!
//! [`Subscriber::spawn`] starts a background task that drives a
//! [`ReconnectController`] against a real transport: it executes the
//! controller's actions, owns the single retry timer, and forwards every
//! inbound message as a [`Notification`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::reconnect::{
    Action, BackoffPolicy, CloseKind, LinkStatus, ReconnectController, RetryToken,
};
use crate::domain::{ClientId, Event};
use crate::ws::messages::ServerMessage;

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const NOTIFICATION_BUFFER: usize = 64;

/// Message delivered to the subscriber's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The relay acknowledged the connection.
    Established {
        /// Identifier the relay assigned.
        client_id: ClientId,
    },
    /// A broadcast event, as published.
    Event(Event),
}

impl Notification {
    fn parse(text: &str) -> Self {
        if let Ok(ServerMessage::ConnectionEstablished { client_id, .. }) =
            serde_json::from_str::<ServerMessage>(text)
        {
            return Self::Established { client_id };
        }
        // The relay forwards string events as their raw text.
        let value = serde_json::from_str::<serde_json::Value>(text)
            .unwrap_or_else(|_| serde_json::Value::String(text.to_owned()));
        Self::Event(Event::new(value))
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct Subscriber {
    url: String,
    policy: BackoffPolicy,
    connect_timeout: Duration,
}

impl Subscriber {
    /// Subscribes to the relay at `url` (e.g. `ws://localhost:8081`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: BackoffPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the backoff policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the per-attempt connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Starts the subscription on the current tokio runtime.
    ///
    /// Notifications arrive on the returned receiver until the handle is
    /// shut down.
    #[must_use]
    pub fn spawn(self) -> (SubscriberHandle, mpsc::Receiver<Notification>) {
        let controller = ReconnectController::new(self.policy);
        let (status_tx, status_rx) = watch::channel(controller.status());
        let (events_tx, events_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let reconnect = Arc::new(Notify::new());

        let driver = Driver {
            url: self.url,
            connect_timeout: self.connect_timeout,
            controller,
            status: status_tx,
            events: events_tx,
            shutdown: shutdown_rx,
            reconnect: Arc::clone(&reconnect),
            retry: None,
        };
        let task = tokio::spawn(driver.run());

        (
            SubscriberHandle {
                shutdown: Some(shutdown_tx),
                status: status_rx,
                reconnect,
                task,
            },
            events_rx,
        )
    }
}

/// Control handle for a running subscriber.
#[derive(Debug)]
pub struct SubscriberHandle {
    shutdown: Option<oneshot::Sender<()>>,
    status: watch::Receiver<LinkStatus>,
    reconnect: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    /// Current link status.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// A receiver that observes every status change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Asks for an immediate reconnection with a fresh attempt budget.
    /// Has no effect while a connection is being established or is open.
    pub fn reconnect(&self) {
        self.reconnect.notify_waiters();
    }

    /// Tears the subscription down: cancels any pending retry, closes an
    /// open connection normally, and waits for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            // The task may already have exited.
            let _ = tx.send(());
        }
        if let Err(error) = (&mut self.task).await {
            tracing::warn!(%error, "subscriber task failed");
        }
    }
}

enum SessionEnd {
    Closed(CloseKind),
    Stopped,
}

struct Driver {
    url: String,
    connect_timeout: Duration,
    controller: ReconnectController,
    status: watch::Sender<LinkStatus>,
    events: mpsc::Sender<Notification>,
    shutdown: oneshot::Receiver<()>,
    reconnect: Arc<Notify>,
    retry: Option<(RetryToken, Instant)>,
}

impl Driver {
    async fn run(mut self) {
        let mut queue: VecDeque<Action> = self.controller.start().into();
        self.publish();

        loop {
            while let Some(action) = queue.pop_front() {
                match action {
                    Action::Connect => match self.connect().await {
                        Some(actions) => queue.extend(actions),
                        None => {
                            self.stop();
                            return;
                        }
                    },
                    Action::ScheduleRetry { token, delay } => {
                        self.retry = Some((token, Instant::now() + delay));
                    }
                    Action::CancelRetry(token) => {
                        if self.retry.is_some_and(|(pending, _)| pending == token) {
                            self.retry = None;
                        }
                    }
                    // Both only arise inside an open session.
                    Action::Refresh | Action::CloseNormally => {}
                }
                self.publish();
            }

            let actions = match self.retry {
                Some((token, deadline)) => {
                    tokio::select! {
                        _ = &mut self.shutdown => None,
                        () = self.reconnect.notified() => Some(self.controller.reconnect()),
                        () = tokio::time::sleep_until(deadline) => {
                            self.retry = None;
                            Some(self.controller.retry_elapsed(token))
                        }
                    }
                }
                None => {
                    tracing::debug!(state = ?self.controller.state(), "subscriber idle");
                    tokio::select! {
                        _ = &mut self.shutdown => None,
                        () = self.reconnect.notified() => Some(self.controller.reconnect()),
                    }
                }
            };

            match actions {
                Some(actions) => queue.extend(actions),
                None => {
                    self.stop();
                    return;
                }
            }
        }
    }

    /// Runs one connection attempt and, if it succeeds, the session on top
    /// of it. Returns `None` once the subscriber has been stopped.
    async fn connect(&mut self) -> Option<Vec<Action>> {
        tracing::debug!(url = %self.url, attempts = self.controller.attempts(), "connecting");
        let attempt = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        );
        let result = tokio::select! {
            _ = &mut self.shutdown => None,
            result = attempt => Some(result),
        };

        let stream = match result? {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(error)) => {
                tracing::warn!(url = %self.url, %error, "connection attempt failed");
                return Some(self.controller.on_error());
            }
            Err(_) => {
                tracing::warn!(url = %self.url, "connection attempt timed out");
                return Some(self.controller.on_error());
            }
        };

        let mut actions = self.controller.on_open();
        self.publish();
        tracing::info!(url = %self.url, "subscribed");

        match self.session(stream).await {
            SessionEnd::Closed(kind) => {
                actions.extend(self.controller.on_close(kind));
                Some(actions)
            }
            SessionEnd::Stopped => None,
        }
    }

    async fn session(&mut self, stream: Stream) -> SessionEnd {
        let (mut sink, mut source) = stream.split();

        loop {
            let frame = tokio::select! {
                _ = &mut self.shutdown => None,
                frame = source.next() => Some(frame),
            };
            let Some(frame) = frame else {
                self.close_session(&mut sink).await;
                return SessionEnd::Stopped;
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let notification = Notification::parse(text.as_str());
                    if self.controller.on_message().contains(&Action::Refresh)
                        && self.events.send(notification).await.is_err()
                    {
                        tracing::debug!("notification receiver dropped");
                        self.close_session(&mut sink).await;
                        return SessionEnd::Stopped;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let kind = match &frame {
                        Some(frame) if frame.code == CloseCode::Normal => CloseKind::Clean,
                        _ => CloseKind::Abnormal,
                    };
                    tracing::info!(?kind, "relay closed the connection");
                    return SessionEnd::Closed(kind);
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::warn!(%error, "subscription transport error");
                    return SessionEnd::Closed(CloseKind::Abnormal);
                }
                None => return SessionEnd::Closed(CloseKind::Abnormal),
            }
        }
    }

    async fn close_session<S>(&mut self, sink: &mut S)
    where
        S: futures_util::Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let actions = self.controller.teardown();
        self.retry = None;
        if actions.contains(&Action::CloseNormally) {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: Utf8Bytes::from_static("subscriber shutdown"),
            };
            if let Err(error) = sink.send(Message::Close(Some(frame))).await {
                tracing::debug!(%error, "close frame not delivered");
            }
        }
        self.publish();
    }

    fn stop(&mut self) {
        self.controller.teardown();
        self.retry = None;
        self.publish();
        tracing::debug!("subscriber stopped");
    }

    fn publish(&self) {
        self.status.send_replace(self.controller.status());
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::client::reconnect::LinkState;

    #[test]
    fn welcome_parses_as_established() {
        let id = ClientId::new();
        let Ok(text) = serde_json::to_string(&ServerMessage::established(id)) else {
            panic!("serialization failed");
        };
        assert_eq!(
            Notification::parse(&text),
            Notification::Established { client_id: id }
        );
    }

    #[test]
    fn other_json_is_an_event() {
        let Notification::Event(event) = Notification::parse(r#"{"type":"book_deleted","id":3}"#)
        else {
            panic!("expected an event");
        };
        assert_eq!(event.kind(), Some("book_deleted"));
    }

    #[test]
    fn string_event_frame_is_delivered_as_string() {
        let published = Event::new(serde_json::Value::String("refresh".to_owned()));
        let Ok(frame) = published.to_frame() else {
            panic!("frame encoding failed");
        };
        assert_eq!(frame.as_str(), "refresh");
        assert_eq!(Notification::parse(frame.as_str()), Notification::Event(published));
    }

    #[tokio::test]
    async fn gives_up_after_policy_exhausted() {
        let Ok(listener) = std::net::TcpListener::bind("127.0.0.1:0") else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        drop(listener);

        let policy = BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20), 2);
        let (handle, _events) = Subscriber::new(format!("ws://{addr}"))
            .with_policy(policy)
            .spawn();

        let mut status = handle.watch();
        let reached = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.state == LinkState::Closed(CloseKind::Abnormal) && s.attempts == 2),
        )
        .await
        .is_ok_and(|seen| seen.is_ok());
        assert!(reached);
        handle.shutdown().await;
    }
}
