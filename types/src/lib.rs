//! Shared types for the MCP sendmail server.
//!
//! This crate contains the JSON-RPC 2.0 envelope, the MCP protocol payloads
//! and the HTTP API types shared between the server and its clients.

/// Default port for the MCP sendmail server.
pub const DEFAULT_PORT: u16 = 8000;

/// Server name reported in `initialize` and `/health`.
pub const SERVER_NAME: &str = "mcp-sendmail-server";

/// Header carrying the session identifier (request and response).
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the negotiated protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Header carrying the last event id a stream consumer has seen.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub mod api;
pub mod email;
pub mod jsonrpc;
pub mod mcp;

// Re-export commonly used types
pub use api::{ErrorResponse, HealthResponse};
pub use email::{SendBulkEmailArgs, SendEmailArgs, SendTemplateEmailArgs};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use mcp::{
    CallToolResult, Content, InitializeParams, InitializeResult, ListToolsResult,
    ToolCallParams, ToolDescriptor, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
