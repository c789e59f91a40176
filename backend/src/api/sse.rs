//! Legacy Server-Sent Events endpoint.

use axum::response::sse::{Event, Sse};
use futures::stream::{self, Stream};
use serde_json::json;
use std::convert::Infallible;
use tracing::info;

/// Legacy SSE endpoint (deprecated).
///
/// Emits a single `message` event pointing clients at `GET /mcp`, then
/// closes the stream.
///
/// Example usage from JavaScript:
/// ```javascript
/// const eventSource = new EventSource('http://localhost:8000/sse');
/// eventSource.onmessage = (event) => console.log(JSON.parse(event.data).message);
/// ```
#[utoipa::path(
    get,
    path = "/sse",
    tag = "mcp",
    responses(
        (status = 200, description = "One notice event, then end of stream", content_type = "text/event-stream")
    )
)]
pub async fn legacy_sse() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("Legacy SSE client connected");
    let notice = json!({
        "type": "notification",
        "message": "Legacy SSE endpoint. Use GET /mcp instead.",
    });
    Sse::new(stream::once(async move {
        Ok(Event::default().event("message").data(notice.to_string()))
    }))
}
