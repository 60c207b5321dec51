//! Server assembly: router, liveness supervision, and graceful shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::service::LivenessMonitor;
use crate::ws::handler::ws_handler;

/// Builds the full application: subscribe endpoint at `/`, ingestion at
/// `/update`, diagnostics, and permissive CORS on every route.
pub fn build_app(state: AppState, config: &RelayConfig) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .merge(api::build_router(config.max_event_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serves the relay on `listener` until `shutdown` resolves.
///
/// Spawns the liveness monitor for the lifetime of the server. On shutdown
/// every registered connection is force-closed before the call returns.
///
/// # Errors
///
/// Returns [`RelayError::Io`] if the listener fails.
pub async fn serve<F>(listener: TcpListener, config: RelayConfig, shutdown: F) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState::new(&config);
    serve_state(listener, config, state, shutdown).await
}

async fn serve_state<F>(
    listener: TcpListener,
    config: RelayConfig,
    state: AppState,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = Arc::clone(&state.registry);
    let shutdown_registry = Arc::clone(&state.registry);
    let monitor = LivenessMonitor::new(
        Arc::clone(&state.registry),
        config.heartbeat_interval,
        config.idle_timeout,
    )
    .spawn();

    let app = build_app(state, &config);
    tracing::info!(
        addr = %listener.local_addr()?,
        heartbeat_ms = config.heartbeat_interval.as_millis(),
        idle_timeout_ms = config.idle_timeout.as_millis(),
        "relay listening"
    );

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        let closed = shutdown_registry.drain();
        tracing::info!(closed, "shutting down, subscribers closed");
    })
    .await;

    monitor.shutdown();
    // Upgrades completing after the first drain registered late.
    let late = registry.drain();
    if late > 0 {
        tracing::info!(closed = late, "closed subscribers registered during shutdown");
    }
    result.map_err(RelayError::from)
}

/// Binds `config.listen_addr` and serves until Ctrl+C.
///
/// # Errors
///
/// Returns [`RelayError::Io`] if binding or serving fails.
pub async fn run(config: RelayConfig) -> Result<(), RelayError> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    serve(listener, config, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
