//! OpenAPI documentation for the PeerHub API

use utoipa::OpenApi;

/// API Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PeerHub API",
        version = "1.0.0",
        description = "Peer registry and scatter/gather task dispatch.\n\n## Features\n- Track WebSocket-connected peers and their liveness\n- Filter peers by id or geographic radius\n- Fan a task out to many peers and collect answers until a deadline",
        license(name = "MIT"),
        contact(name = "PeerHub Team")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    tags(
        (name = "peers", description = "Peer registry"),
        (name = "dispatch", description = "Scatter/gather task dispatch"),
        (name = "tasks", description = "Retained task records"),
        (name = "system", description = "Health and stats")
    ),
    paths(
        crate::api::health::health_check,
        crate::api::health::stats,
        crate::api::peers::list_peers,
        crate::api::peers::get_peer,
        crate::api::peers::register_peer,
        crate::api::peers::heartbeat,
        crate::api::peers::remove_peer,
        crate::api::dispatch::dispatch_json,
        crate::api::dispatch::dispatch_upload,
        crate::api::tasks::list_tasks,
        crate::api::tasks::get_task,
    ),
    components(
        schemas(
            crate::api::health::HealthResponse,
            crate::api::health::StatsResponse,
            crate::api::peers::PeerView,
            crate::api::peers::RegisterPeerRequest,
            crate::api::dispatch::DispatchBody,
            crate::api::tasks::TaskView,
            crate::api::tasks::AttachmentInfo,
            crate::registry::PeerMeta,
            crate::dispatch::DispatchResult,
            crate::dispatch::TaskStatus,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_dispatch_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/dispatch"));
        assert!(doc.paths.paths.contains_key("/api/peers/{id}"));
    }
}
