//! HTTP API layer: ingestion and system endpoints plus the OpenAPI
//! document describing them.

pub mod handlers;

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};

/// OpenAPI document for the relay's HTTP surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "catalog-relay", description = "Real-time notification relay"),
    paths(handlers::publish::publish_update, handlers::system::health_handler),
    components(schemas(ErrorResponse, ErrorBody, handlers::system::HealthResponse)),
    tags(
        (name = "Relay", description = "Event ingestion"),
        (name = "System", description = "Health and diagnostics"),
    )
)]
pub struct ApiDoc;

/// Builds the complete HTTP router (the WebSocket route is added by the
/// server).
pub fn build_router(max_event_bytes: usize) -> Router<AppState> {
    let router = Router::new()
        .merge(handlers::publish::routes(max_event_bytes))
        .merge(handlers::system::routes())
        .route("/api-docs/openapi.json", get(openapi_json));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/swagger.json", ApiDoc::openapi()),
    );

    router
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
