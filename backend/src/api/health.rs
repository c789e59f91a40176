//! Health check endpoint.

use axum::{extract::State, Json};
use mcp_sendmail_types::HealthResponse;

use crate::state::AppState;

/// Get service health and SMTP target
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.health())
}
