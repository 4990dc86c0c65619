//! PeerHub Backend Library
//!
//! Peer registry, liveness monitoring and scatter/gather task dispatch,
//! served over HTTP and WebSocket.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod geo;
pub mod protocol;
pub mod registry;
pub mod session;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;
use crate::api::AppState;

/// Multipart framing overhead allowed on top of the attachment limit
const UPLOAD_BODY_SLACK: usize = 64 * 1024;

/// Create the application router with the given state
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes.saturating_add(UPLOAD_BODY_SLACK);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/api/stats", get(api::health::stats))
        // Peers
        .route("/api/peers", get(api::peers::list_peers))
        .route("/api/peers/register", post(api::peers::register_peer))
        .route(
            "/api/peers/:id",
            get(api::peers::get_peer).delete(api::peers::remove_peer),
        )
        .route("/api/peers/:id/heartbeat", post(api::peers::heartbeat))
        // Dispatch
        .route("/api/dispatch", post(api::dispatch::dispatch_json))
        .route(
            "/api/dispatch/upload",
            post(api::dispatch::dispatch_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Tasks
        .route("/api/tasks", get(api::tasks::list_tasks))
        .route("/api/tasks/:id", get(api::tasks::get_task))
        // WebSocket
        .route("/ws", get(api::ws::peer_socket_handler))
        .route("/ws/events", get(api::ws::events_handler))
        // Metrics (Prometheus)
        .route("/metrics", get(api::metrics::metrics_handler))
        // OpenAPI / Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// Create CORS layer with secure configuration
fn cors_layer() -> CorsLayer {
    // Allow origins from environment or default to localhost for development
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());

    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true)
}
