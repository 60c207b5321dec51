//! Per-connection read/write loop.
//!
//! Drains the connection's outbound queue into the socket and feeds
//! inbound frames back into the registry as liveness signals. Any exit
//! path ends with an idempotent unregister.

use std::fmt::Display;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::Instant;

use super::acceptor::AcceptedConnection;
use super::messages::ClientMessage;
use crate::domain::{ClientId, ConnectionRegistry, Outbound};

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Writes frames queued on the connection's outbound queue.
/// - Records inbound activity and probe acknowledgments.
/// - Exits on close, transport fault, or forced termination, including
///   while a write to a client that stopped reading is still pending.
pub async fn run_connection(
    socket: WebSocket,
    connection: AcceptedConnection,
    registry: Arc<ConnectionRegistry>,
) {
    let (ws_tx, ws_rx) = socket.split();
    pump(ws_tx, ws_rx, connection, &registry).await;
}

async fn pump<S, R>(
    mut ws_tx: S,
    mut ws_rx: R,
    connection: AcceptedConnection,
    registry: &ConnectionRegistry,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let AcceptedConnection {
        id,
        handle,
        mut outbound,
    } = connection;

    loop {
        tokio::select! {
            () = handle.terminated() => {
                tracing::debug!(client_id = %id, "connection terminated by relay");
                break;
            }
            // Frame queued by the broadcast engine, acceptor, or monitor
            frame = outbound.recv() => {
                let message = match frame {
                    Some(Outbound::Text(text)) => Message::Text(text),
                    Some(Outbound::Ping) => Message::Ping(Bytes::new()),
                    None => break,
                };
                tokio::select! {
                    () = handle.terminated() => {
                        tracing::debug!(client_id = %id, "connection terminated during write");
                        break;
                    }
                    sent = ws_tx.send(message) => {
                        if let Err(error) = sent {
                            tracing::warn!(client_id = %id, %error, "write failed");
                            break;
                        }
                    }
                }
            }
            // Incoming frame from the client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        registry.acknowledge_probe(id, Instant::now());
                    }
                    Some(Ok(Message::Text(text))) => handle_text(registry, id, text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        handle.mark_closing();
                        match frame {
                            Some(frame) => tracing::info!(
                                client_id = %id,
                                code = frame.code,
                                reason = frame.reason.as_str(),
                                "client closed connection"
                            ),
                            None => tracing::info!(client_id = %id, "client closed connection"),
                        }
                        break;
                    }
                    Some(Ok(Message::Binary(_) | Message::Ping(_))) => {
                        registry.record_activity(id, Instant::now());
                    }
                    Some(Err(error)) => {
                        tracing::warn!(client_id = %id, %error, "transport error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Only removes the entry if it still belongs to this connection.
    if registry.unregister_channel(id, &handle) {
        tracing::info!(client_id = %id, remaining = registry.len(), "client disconnected");
    }
}

/// Handles a text frame: `{"type":"pong"}` acknowledges the probe, anything
/// else only counts as activity.
fn handle_text(registry: &ConnectionRegistry, id: ClientId, text: &str) {
    let now = Instant::now();
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => match serde_json::from_value::<ClientMessage>(value) {
            Ok(ClientMessage::Pong) => {
                registry.acknowledge_probe(id, now);
            }
            Err(_) => {
                registry.record_activity(id, now);
                tracing::debug!(client_id = %id, "client message ignored");
            }
        },
        Err(error) => {
            registry.record_activity(id, now);
            tracing::debug!(client_id = %id, %error, "unparseable client message");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{ChannelState, ConnectionEntry, ConnectionHandle};
    use std::time::Duration;
    use axum::extract::ws::Utf8Bytes;

    /// A sink whose writes never complete, like a socket to a client that
    /// stopped reading.
    fn stalled_sink() -> impl Sink<Message, Error = std::io::Error> + Unpin {
        Box::pin(futures_util::sink::unfold((), |(), _message: Message| async {
            std::future::pending::<Result<(), std::io::Error>>().await
        }))
    }

    fn silent_stream() -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        futures_util::stream::pending()
    }

    fn accepted(registry: &ConnectionRegistry, id: ClientId) -> AcceptedConnection {
        let (handle, outbound) = ConnectionHandle::channel(4);
        registry.register(ConnectionEntry::new(id, handle.clone(), None, Instant::now()));
        handle.mark_open();
        AcceptedConnection {
            id,
            handle,
            outbound,
        }
    }

    fn registered(registry: &ConnectionRegistry, at: Instant) -> ClientId {
        let (handle, _rx) = ConnectionHandle::channel(1);
        let id = ClientId::new();
        registry.register(ConnectionEntry::new(id, handle, None, at));
        id
    }

    #[tokio::test]
    async fn eviction_ends_a_stalled_write() {
        let registry = Arc::new(ConnectionRegistry::new());
        let id = ClientId::new();
        let connection = accepted(&registry, id);
        let handle = connection.handle.clone();
        assert!(handle.try_send(Outbound::Text(Utf8Bytes::from_static("update"))).is_ok());

        let task = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { pump(stalled_sink(), silent_stream(), connection, &registry).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        assert!(registry.unregister(id));
        let joined = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn displaced_connection_exit_keeps_replacement() {
        let registry = Arc::new(ConnectionRegistry::new());
        let id = ClientId::new();
        let displaced = accepted(&registry, id);
        let task = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { pump(stalled_sink(), silent_stream(), displaced, &registry).await }
        });

        let replacement = accepted(&registry, id);
        let joined = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(matches!(joined, Ok(Ok(()))));

        assert!(registry.contains(id));
        assert_eq!(replacement.handle.state(), ChannelState::Open);
        let Some(entry) = registry.get(id) else {
            panic!("replacement vanished");
        };
        assert!(entry.handle().same_channel(&replacement.handle));
    }

    #[test]
    fn pong_text_acknowledges_probe() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry, Instant::now());
        registry.arm_probe(id, Instant::now());

        handle_text(&registry, id, r#"{"type":"pong"}"#);

        let Some(entry) = registry.get(id) else {
            panic!("entry vanished");
        };
        assert!(entry.liveness().is_alive());
    }

    #[test]
    fn other_text_only_records_activity() {
        let registry = ConnectionRegistry::new();
        let start = Instant::now();
        let id = registered(&registry, start);
        registry.arm_probe(id, start);
        std::thread::sleep(Duration::from_millis(5));

        handle_text(&registry, id, "not json at all");
        handle_text(&registry, id, r#"{"type":"hello"}"#);

        let Some(entry) = registry.get(id) else {
            panic!("entry vanished");
        };
        assert!(!entry.liveness().is_alive());
        assert!(entry.liveness().last_activity > start);
    }
}
