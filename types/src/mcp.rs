//! MCP protocol payloads carried inside JSON-RPC envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version offered when the client asks for one we do not speak.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions this server can negotiate, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Returns true if `version` is one of [`SUPPORTED_PROTOCOL_VERSIONS`].
pub fn is_supported_protocol_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Pick the protocol version to answer `initialize` with.
///
/// The client's requested version is echoed when supported, otherwise the
/// newest supported version is offered.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| {
            SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .copied()
                .find(|supported| *supported == v)
        })
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Name and version of a protocol participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Value>,
    #[serde(default)]
    pub client_info: Option<Implementation>,
}

/// Tool-related server capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

/// Capabilities advertised in the `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
    pub logging: serde_json::Map<String, Value>,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

/// Public description of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of the `tools/list` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
}

/// Parameters of the `tools/call` request.
///
/// `name` is optional on the wire so that a missing name can be reported as
/// an invalid-params error instead of a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// A content block in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

/// Result of the `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(default)]
    pub is_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_negotiate_protocol_version() {
        assert_eq!(negotiate_protocol_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(
            negotiate_protocol_version(Some("1999-01-01")),
            LATEST_PROTOCOL_VERSION
        );
        assert_eq!(negotiate_protocol_version(None), LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn test_tool_descriptor_uses_camel_case_schema() {
        let descriptor = ToolDescriptor {
            name: "verify_connection".to_string(),
            description: "Verify SMTP connection and credentials".to_string(),
            input_schema: json!({"type": "object"}),
        };
        let value = serde_json::to_value(&descriptor).unwrap();

        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("input_schema").is_none());
    }

    #[test]
    fn test_call_tool_result_shape() {
        let result = CallToolResult {
            content: vec![Content::text("hello")],
            is_error: true,
        };

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"content": [{"type": "text", "text": "hello"}], "isError": true})
        );
    }
}
