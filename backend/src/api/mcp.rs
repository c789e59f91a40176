//! MCP Streamable HTTP endpoint handlers.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send a JSON-RPC request or notification
//! - `GET /mcp` - Open the SSE stream of a session, optionally resuming
//!   after `Last-Event-Id`

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use mcp_sendmail_types::{
    ErrorResponse, LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER,
};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::mcp::{
    CloseReason, PostOutcome, SessionError, StreamHandle, StreamItem, TransportError,
};
use crate::state::AppState;

/// Read a header as a string. Non-UTF-8 values are treated as absent.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_header(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let status = match &self {
            TransportError::Malformed(envelope) => {
                return (StatusCode::BAD_REQUEST, Json(envelope.as_ref())).into_response();
            }
            TransportError::MissingSessionId
            | TransportError::SessionRequired(_)
            | TransportError::UnsupportedProtocolVersion(_)
            | TransportError::InvalidLastEventId(_) => StatusCode::BAD_REQUEST,
            TransportError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
            TransportError::Session(SessionError::Busy(_)) => StatusCode::CONFLICT,
            TransportError::Session(SessionError::HistoryLost { .. }) => StatusCode::GONE,
            TransportError::Session(SessionError::UnknownEventId(_)) => StatusCode::BAD_REQUEST,
            TransportError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        debug!("MCP request rejected ({}): {}", status, self);
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// POST /mcp - Handle one JSON-RPC message.
///
/// A successful `initialize` without `Mcp-Session-Id` creates a session and
/// returns its id in the `Mcp-Session-Id` response header. Every other
/// request must carry that header.
#[utoipa::path(
    post,
    path = "/mcp",
    tag = "mcp",
    request_body(content = Object, description = "JSON-RPC 2.0 request or notification"),
    params(
        ("Mcp-Session-Id" = Option<String>, Header, description = "Session id assigned by initialize"),
        ("Mcp-Protocol-Version" = Option<String>, Header, description = "Negotiated protocol version")
    ),
    responses(
        (status = 200, description = "JSON-RPC response", body = Object),
        (status = 202, description = "Notification accepted"),
        (status = 400, description = "Malformed message or missing session", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let session_id = header_value(&headers, SESSION_ID_HEADER);
    let protocol_version = header_value(&headers, PROTOCOL_VERSION_HEADER);
    debug!("MCP POST: session={:?}", session_id);

    let outcome = match state
        .transport()
        .handle_post(session_id, protocol_version, &body)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };

    match outcome {
        PostOutcome::Response {
            session,
            event,
            created,
        } => {
            if created {
                info!("MCP: New session initialized: {}", session.id());
            }
            let mut response = (StatusCode::OK, Json(event.payload)).into_response();
            set_header(&mut response, SESSION_ID_HEADER, session.id());
            set_header(
                &mut response,
                PROTOCOL_VERSION_HEADER,
                session.protocol_version(),
            );
            response
        }
        PostOutcome::Accepted { session } => {
            let mut response = StatusCode::ACCEPTED.into_response();
            set_header(&mut response, SESSION_ID_HEADER, session.id());
            response
        }
        PostOutcome::Rejected(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
    }
}

/// GET /mcp - Open the SSE stream of a session.
///
/// Replays retained events after `Last-Event-Id` (or the whole retained log
/// without it), then delivers new events as they are appended. Only one
/// stream per session may be open at a time.
#[utoipa::path(
    get,
    path = "/mcp",
    tag = "mcp",
    params(
        ("Mcp-Session-Id" = String, Header, description = "Session id assigned by initialize"),
        ("Last-Event-Id" = Option<String>, Header, description = "Resume after this event id")
    ),
    responses(
        (status = 200, description = "SSE stream of JSON-RPC messages", content_type = "text/event-stream"),
        (status = 400, description = "Missing session header or invalid event id", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "A stream is already attached", body = ErrorResponse),
        (status = 410, description = "Requested events are no longer retained", body = ErrorResponse)
    )
)]
pub async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = header_value(&headers, SESSION_ID_HEADER);
    let last_event_id = header_value(&headers, LAST_EVENT_ID_HEADER);

    let handle = match state
        .transport()
        .open_stream(session_id, last_event_id)
        .await
    {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };

    info!("MCP: SSE stream opened for session {}", handle.session_id());
    Sse::new(create_sse_stream(handle))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

/// Turn a stream handle into SSE frames.
///
/// The handle moves into the stream, so it is dropped (and the session's
/// stream slot released) whenever the response body is dropped.
fn create_sse_stream(handle: StreamHandle) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(handle, |mut handle| async move {
        let event = match handle.next().await? {
            StreamItem::Event(stored) => Event::default()
                .id(stored.id.to_string())
                .event("message")
                .data(stored.payload.to_string()),
            StreamItem::Closed(reason) => {
                if reason == CloseReason::Lagged {
                    warn!(
                        "MCP: SSE consumer of session {} fell behind the event log",
                        handle.session_id()
                    );
                }
                info!(
                    "MCP: SSE stream closed for session {} ({})",
                    handle.session_id(),
                    reason.as_str()
                );
                Event::default()
                    .event("close")
                    .data(json!({"reason": reason.as_str()}).to_string())
            }
        };
        Some((Ok(event), handle))
    })
}
