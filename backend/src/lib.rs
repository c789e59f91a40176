//! MCP sendmail server library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::{
    routing::{get, post},
    Json, Router,
};
use mcp_sendmail_types::{LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub mod api;
pub mod config;
pub mod email;
pub mod jsonrpc;
pub mod logging;
pub mod mcp;
pub mod openapi;
pub mod state;
pub mod tools;

use state::AppState;

/// Create the Axum application router with a given state and CORS origins.
///
/// If `cors_allowed_origins` is empty, any origin is allowed.
/// Otherwise, only the specified origins are allowed.
pub fn create_app(state: AppState, cors_allowed_origins: &[String]) -> Router {
    let session_id = HeaderName::from_static(SESSION_ID_HEADER);
    let protocol_version = HeaderName::from_static(PROTOCOL_VERSION_HEADER);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            session_id.clone(),
            protocol_version.clone(),
            HeaderName::from_static(LAST_EVENT_ID_HEADER),
        ])
        .expose_headers([session_id, protocol_version]);

    // If no origins specified, allow any origin
    let cors = if cors_allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins).allow_credentials(true)
    };

    Router::new()
        .route("/health", get(api::health::health))
        .route("/mcp", post(api::mcp::mcp_post).get(api::mcp::mcp_get))
        .route("/", post(api::rpc::jsonrpc))
        .route("/rpc", post(api::rpc::jsonrpc))
        .route("/jsonrpc", post(api::rpc::jsonrpc))
        .route("/sse", get(api::sse::legacy_sse))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
