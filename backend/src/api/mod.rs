//! API handlers.

pub mod health;
pub mod mcp;
pub mod rpc;
pub mod sse;
