//! Stateless JSON-RPC endpoints (`POST /`, `/rpc`, `/jsonrpc`).
//!
//! These dispatch straight to the method table without sessions or event
//! logs, for clients that predate the Streamable HTTP transport.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

use crate::jsonrpc::{decode_body, Dispatcher};
use crate::state::AppState;

/// POST /rpc - Handle a JSON-RPC request without a session.
#[utoipa::path(
    post,
    path = "/rpc",
    tag = "mcp",
    request_body(content = Object, description = "JSON-RPC 2.0 request or notification"),
    responses(
        (status = 200, description = "JSON-RPC response", body = Object),
        (status = 202, description = "Notification accepted"),
        (status = 400, description = "Malformed JSON-RPC message", body = Object)
    )
)]
pub async fn jsonrpc(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match decode_body(&body).and_then(Dispatcher::validate) {
        Ok(request) => request,
        Err(envelope) => return (StatusCode::BAD_REQUEST, Json(envelope)).into_response(),
    };
    debug!("JSON-RPC (stateless): method={}", request.method);

    match state.dispatcher().handle(request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
