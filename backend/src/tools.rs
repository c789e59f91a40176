//! Tool registry.
//!
//! Maps a tool name to its public descriptor and an async handler. The
//! registry is filled once at startup and shared read-only afterwards.

use futures::future::BoxFuture;
use futures::FutureExt;
use mcp_sendmail_types::ToolDescriptor;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Error type for tool registration and invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The arguments could not be decoded or failed validation.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool failed: {0}")]
    Failed(String),
}

type BoxedTool = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: BoxedTool,
}

/// Decode tool arguments into `T`.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Decode tool arguments into `T` and run its `garde` validation rules.
pub fn parse_validated_arguments<T>(arguments: Value) -> Result<T, ToolError>
where
    T: DeserializeOwned + garde::Validate,
    T::Context: Default,
{
    let parsed: T = parse_arguments(arguments)?;
    parsed
        .validate()
        .map_err(|report| ToolError::InvalidArguments(report.to_string()))?;
    Ok(parsed)
}

/// Ordered table of callable tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Result<(), ToolError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }

        let handler: BoxedTool = Arc::new(move |arguments| handler(arguments).boxed());
        self.index.insert(name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor: ToolDescriptor {
                name,
                description: description.into(),
                input_schema,
            },
            handler,
        });
        Ok(())
    }

    /// Descriptors of all tools, in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    /// Invoke a tool by name.
    ///
    /// Handler failures are returned as-is; tools report ordinary domain
    /// failures inside their result payload.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let Some(&position) = self.index.get(name) else {
            return Err(ToolError::ToolNotFound(name.to_string()));
        };
        debug!("Invoking tool {}", name);
        let handler = self.tools[position].handler.clone();
        handler(arguments).await
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
