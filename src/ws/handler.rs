//! Axum WebSocket upgrade handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::http::header::ORIGIN;
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;

/// `GET /`: Upgrade the request to a subscriber WebSocket.
///
/// No authentication and no payload: any client reaching the relay may
/// subscribe. The connection is registered once the upgrade completes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    tracing::debug!(%peer, %origin, "websocket upgrade requested");

    let acceptor = state.acceptor.clone();
    let registry = Arc::clone(&state.registry);

    ws.on_failed_upgrade(move |error| {
        tracing::warn!(%peer, %error, "websocket upgrade failed");
    })
    .on_upgrade(move |socket| {
        let connection = acceptor.accept(Some(peer));
        run_connection(socket, connection, registry)
    })
}
