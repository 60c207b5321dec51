//! Ingestion endpoint: accepts one externally-produced event per request.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;

use crate::app_state::AppState;
use crate::domain::Event;
use crate::error::{ErrorResponse, RelayError};

/// `POST /update`: Broadcast an event to every subscriber.
///
/// The body may be any JSON value; it is forwarded verbatim. The response
/// is sent as soon as the broadcast has been issued, before any client
/// has necessarily received it.
///
/// # Errors
///
/// Returns [`RelayError::MalformedEvent`] if the body is not valid JSON.
#[utoipa::path(
    post,
    path = "/update",
    tag = "Relay",
    summary = "Publish an event",
    description = "Fans the JSON body out to every open subscriber. Delivery is best-effort and asynchronous.",
    request_body(content = serde_json::Value, description = "Arbitrary event object", content_type = "application/json"),
    responses(
        (status = 200, description = "Broadcast issued", body = String, content_type = "text/plain"),
        (status = 400, description = "Body is not valid JSON", body = ErrorResponse),
    )
)]
pub async fn publish_update(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, RelayError> {
    let event = match Event::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(bytes = body.len(), error = %err, "rejected malformed event");
            return Err(err);
        }
    };

    let report = state.broadcaster.broadcast(&event)?;
    tracing::info!(
        kind = event.kind().unwrap_or("-"),
        delivered = report.delivered,
        pruned = report.pruned + report.failed,
        "event published"
    );

    Ok((StatusCode::OK, "OK"))
}

/// Ingestion routes, with the request body capped at `max_event_bytes`.
pub fn routes(max_event_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/update", post(publish_update))
        .layer(DefaultBodyLimit::max(max_event_bytes))
}
