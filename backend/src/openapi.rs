//! OpenAPI documentation configuration.

use mcp_sendmail_types::api::{ErrorResponse, HealthResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::health::health,
        crate::api::mcp::mcp_post,
        crate::api::mcp::mcp_get,
        crate::api::rpc::jsonrpc,
        crate::api::sse::legacy_sse,
    ),
    components(schemas(HealthResponse, ErrorResponse)),
    tags(
        (name = "mcp", description = "MCP Streamable HTTP transport and JSON-RPC endpoints"),
        (name = "System", description = "System information endpoints")
    ),
    info(
        title = "MCP Sendmail Server API",
        description = "MCP server with Streamable HTTP transport for sending emails via SMTP",
        license(
            name = "MIT OR Apache-2.0"
        )
    )
)]
pub struct ApiDoc;
