//! HTTP layer: the agent shell front door and the workflow host's
//! sidecar-compatible workflow API.

pub mod agent_shell;
pub mod error;
pub mod workflow_host;

use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS shared by both services (local development only).
pub(crate) fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
