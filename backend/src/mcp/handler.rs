//! MCP protocol method handlers.
//!
//! Binds `initialize`, `ping`, `tools/list` and `tools/call` onto a
//! [`Dispatcher`], with tool calls routed through a [`ToolRegistry`].

use crate::jsonrpc::{parse_params, DispatchError, Dispatcher, MethodError};
use crate::tools::{ToolError, ToolRegistry};
use mcp_sendmail_types::mcp::{
    negotiate_protocol_version, CallToolResult, Content, Implementation, InitializeParams,
    InitializeResult, ListToolsResult, ServerCapabilities, ToolCallParams, ToolsCapability,
};
use mcp_sendmail_types::SERVER_NAME;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Method that opens a session.
pub const METHOD_INITIALIZE: &str = "initialize";

/// MCP method handlers.
pub struct McpHandler;

impl McpHandler {
    /// Register all MCP protocol methods on `dispatcher`.
    pub fn register(
        dispatcher: &mut Dispatcher,
        tools: Arc<ToolRegistry>,
    ) -> Result<(), DispatchError> {
        dispatcher.register_method(METHOD_INITIALIZE, |params| async move {
            Self::handle_initialize(params)
        })?;
        dispatcher.register_method("notifications/initialized", |_| async move {
            debug!("MCP: Client finished initialization");
            Ok(Value::Null)
        })?;
        dispatcher.register_method("ping", |_| async move { Ok(json!({})) })?;

        let registry = Arc::clone(&tools);
        dispatcher.register_method("tools/list", move |_| {
            let registry = Arc::clone(&registry);
            async move { Self::handle_list_tools(&registry) }
        })?;
        dispatcher.register_method("tools/call", move |params| {
            let registry = Arc::clone(&tools);
            async move { Self::handle_call_tool(&registry, params).await }
        })?;
        Ok(())
    }

    /// Handle the initialize request.
    fn handle_initialize(params: Option<Value>) -> Result<Value, MethodError> {
        let params: InitializeParams = parse_params(params)?;
        let protocol_version = negotiate_protocol_version(params.protocol_version.as_deref());

        match &params.client_info {
            Some(client) => info!(
                "MCP: Initialize from {} {} (protocol {})",
                client.name, client.version, protocol_version
            ),
            None => info!("MCP: Initialize (protocol {})", protocol_version),
        }

        to_result(&InitializeResult {
            protocol_version: protocol_version.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
                logging: Default::default(),
            },
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }

    /// Handle the tools/list request.
    fn handle_list_tools(tools: &ToolRegistry) -> Result<Value, MethodError> {
        to_result(&ListToolsResult { tools: tools.list() })
    }

    /// Handle a tools/call request.
    ///
    /// Unknown tools are reported inside a successful result with `isError`
    /// set; invalid arguments and handler failures become JSON-RPC errors.
    async fn handle_call_tool(
        tools: &ToolRegistry,
        params: Option<Value>,
    ) -> Result<Value, MethodError> {
        let params: ToolCallParams = parse_params(params)?;
        let name = params
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MethodError::invalid_params("Tool name is required"))?;
        let arguments = params.arguments.unwrap_or_else(|| json!({}));

        info!("MCP: Calling tool {}", name);
        let result = match tools.invoke(&name, arguments).await {
            Ok(payload) => {
                let failed = payload.get("success").and_then(Value::as_bool) == Some(false);
                let text = serde_json::to_string_pretty(&payload)
                    .map_err(|e| MethodError::internal(e.to_string()))?;
                CallToolResult {
                    content: vec![Content::text(text)],
                    is_error: failed,
                }
            }
            Err(e @ ToolError::ToolNotFound(_)) => {
                warn!("MCP: {}", e);
                CallToolResult {
                    content: vec![Content::text(e.to_string())],
                    is_error: true,
                }
            }
            Err(ToolError::InvalidArguments(details)) => {
                return Err(MethodError::invalid_params(details))
            }
            Err(e) => return Err(MethodError::internal(e.to_string())),
        };
        to_result(&result)
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, MethodError> {
    serde_json::to_value(value).map_err(|e| MethodError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_sendmail_types::jsonrpc::{error_codes, JsonRpcRequest, JsonRpcResponse};
    use mcp_sendmail_types::LATEST_PROTOCOL_VERSION;

    fn dispatcher() -> Dispatcher {
        let mut tools = ToolRegistry::new();
        tools
            .register(
                "echo",
                "Echo the arguments back",
                json!({"type": "object"}),
                |arguments| async move { Ok(json!({"success": true, "echo": arguments})) },
            )
            .unwrap();
        tools
            .register("refuse", "Always reports failure", json!({}), |_| async move {
                Ok(json!({"success": false, "error": "refused"}))
            })
            .unwrap();
        tools
            .register("strict", "Rejects its arguments", json!({}), |_| async move {
                Err(ToolError::InvalidArguments("missing field `to`".to_string()))
            })
            .unwrap();
        tools
            .register("broken", "Fails internally", json!({}), |_| async move {
                Err(ToolError::Failed("disk on fire".to_string()))
            })
            .unwrap();

        let mut dispatcher = Dispatcher::new();
        McpHandler::register(&mut dispatcher, Arc::new(tools)).unwrap();
        dispatcher
    }

    async fn call(method: &str, params: Value) -> JsonRpcResponse {
        dispatcher()
            .handle(JsonRpcRequest::new(1i64, method, Some(params)))
            .await
            .expect("request should produce a response")
    }

    fn tool_text(response: &JsonRpcResponse) -> String {
        response.result.as_ref().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_initialize_echoes_supported_version() {
        let response = call(
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0"}
            }),
        )
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert!(result["capabilities"]["logging"].is_object());
    }

    #[tokio::test]
    async fn test_initialize_offers_latest_for_unknown_version() {
        let response = call("initialize", json!({"protocolVersion": "1999-01-01"})).await;

        assert_eq!(
            response.result.unwrap()["protocolVersion"],
            LATEST_PROTOCOL_VERSION
        );
    }

    #[tokio::test]
    async fn test_initialized_notification_has_no_response() {
        let response = dispatcher()
            .handle(JsonRpcRequest::notification(
                "notifications/initialized",
                None,
            ))
            .await;

        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_ping() {
        let response = call("ping", json!({})).await;

        assert_eq!(response.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_tools_list_in_registration_order() {
        let response = call("tools/list", json!({})).await;

        let names: Vec<String> = response.result.unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["echo", "refuse", "strict", "broken"]);
    }

    #[tokio::test]
    async fn test_call_tool_wraps_payload_as_text() {
        let response = call("tools/call", json!({"name": "echo", "arguments": {"x": 1}})).await;

        let result = response.result.as_ref().unwrap();
        assert_eq!(result["isError"], false);
        let payload: Value = serde_json::from_str(&tool_text(&response)).unwrap();
        assert_eq!(payload, json!({"success": true, "echo": {"x": 1}}));
    }

    #[tokio::test]
    async fn test_call_tool_without_arguments() {
        let response = call("tools/call", json!({"name": "echo"})).await;

        let payload: Value = serde_json::from_str(&tool_text(&response)).unwrap();
        assert_eq!(payload["echo"], json!({}));
    }

    #[tokio::test]
    async fn test_call_tool_failure_payload_sets_is_error() {
        let response = call("tools/call", json!({"name": "refuse"})).await;

        assert!(!response.is_error());
        assert_eq!(response.result.unwrap()["isError"], true);
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let response = call("tools/call", json!({"name": "missing"})).await;

        assert!(!response.is_error());
        assert_eq!(response.result.as_ref().unwrap()["isError"], true);
        assert_eq!(tool_text(&response), "Tool not found: missing");
    }

    #[tokio::test]
    async fn test_call_tool_without_name() {
        let response = call("tools/call", json!({"arguments": {}})).await;

        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_call_tool_invalid_arguments() {
        let response = call("tools/call", json!({"name": "strict"})).await;

        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::INVALID_PARAMS);
        assert!(error.message.contains("missing field"));
    }

    #[tokio::test]
    async fn test_call_tool_internal_failure() {
        let response = call("tools/call", json!({"name": "broken"})).await;

        assert_eq!(response.error.unwrap().code, error_codes::INTERNAL_ERROR);
    }
}
