//! MCP (Model Context Protocol) Streamable HTTP support.
//!
//! This module implements the MCP Streamable HTTP transport, allowing AI
//! assistants to call the email tools through a single HTTP endpoint with an
//! SSE stream for resumable delivery of responses.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send a JSON-RPC request or notification
//! - `GET /mcp` - Open the SSE stream of a session
//!
//! ## Session Management
//!
//! Sessions are identified by the `Mcp-Session-Id` header, assigned by a
//! successful `initialize` and required for every later request. Sessions
//! idle for longer than the configured timeout are evicted by a background
//! sweeper.

pub mod handler;
pub mod session;
pub mod sweeper;
pub mod transport;

pub use handler::McpHandler;
pub use session::{
    CloseReason, EventId, RetentionPolicy, Session, SessionError, SessionStore, StoredEvent,
    StreamHandle, StreamItem,
};
pub use sweeper::SessionSweeper;
pub use transport::{PostOutcome, StreamableTransport, TransportError, TransportSettings};
