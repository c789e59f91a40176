//! JSON-RPC 2.0 method dispatch.
//!
//! The [`Dispatcher`] owns a table of named async handlers built once at
//! startup. Envelope validation happens in [`Dispatcher::validate`] before
//! any handler runs; un-parseable bodies are caught earlier by
//! [`decode_body`] at the HTTP boundary and never reach the dispatcher.

use futures::future::BoxFuture;
use futures::FutureExt;
use mcp_sendmail_types::jsonrpc::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, JSONRPC_VERSION,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure raised by a method handler.
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    /// The params did not satisfy the method's contract (-32602).
    #[error("{0}")]
    InvalidParams(String),

    /// Anything else that went wrong while handling the call (-32603).
    #[error("{0}")]
    Internal(String),
}

impl MethodError {
    pub fn invalid_params(details: impl Into<String>) -> Self {
        MethodError::InvalidParams(details.into())
    }

    pub fn internal(details: impl Into<String>) -> Self {
        MethodError::Internal(details.into())
    }

    fn into_jsonrpc(self) -> JsonRpcError {
        match self {
            MethodError::InvalidParams(details) => JsonRpcError::invalid_params(details),
            MethodError::Internal(details) => JsonRpcError::internal_error(details),
        }
    }
}

impl From<anyhow::Error> for MethodError {
    fn from(err: anyhow::Error) -> Self {
        MethodError::Internal(format!("{:#}", err))
    }
}

/// Error type for dispatcher setup.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Method already registered: {0}")]
    DuplicateMethod(String),
}

type BoxedMethod =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, MethodError>> + Send + Sync>;

/// Decode method params into `T`, mapping failures to invalid params.
///
/// Absent params decode as an empty object so that structs whose fields are
/// all optional accept calls without params.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, MethodError> {
    let params = match params {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(_) => return Err(MethodError::invalid_params("params must be an object")),
    };
    serde_json::from_value(params).map_err(|e| MethodError::invalid_params(e.to_string()))
}

/// Decode a raw request body into JSON.
///
/// Returns a ready-made `-32700` response when the body is not JSON.
#[allow(clippy::result_large_err)]
pub fn decode_body(bytes: &[u8]) -> Result<Value, JsonRpcResponse> {
    serde_json::from_slice(bytes)
        .map_err(|e| JsonRpcResponse::error(None, JsonRpcError::parse_error(e)))
}

/// Routes JSON-RPC requests to registered method handlers.
#[derive(Clone, Default)]
pub struct Dispatcher {
    methods: HashMap<String, BoxedMethod>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to an async handler.
    pub fn register_method<F, Fut>(
        &mut self,
        name: impl Into<String>,
        handler: F,
    ) -> Result<(), DispatchError>
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(DispatchError::DuplicateMethod(name));
        }
        let boxed: BoxedMethod = Arc::new(move |params| handler(params).boxed());
        self.methods.insert(name, boxed);
        Ok(())
    }

    /// Check if a method is registered.
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Get the number of registered methods.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Validate a decoded JSON value as a JSON-RPC 2.0 request envelope.
    ///
    /// On failure the returned `-32600` response carries the request id when
    /// one could be recovered.
    #[allow(clippy::result_large_err)]
    pub fn validate(value: Value) -> Result<JsonRpcRequest, JsonRpcResponse> {
        let mut object = match value {
            Value::Object(object) => object,
            Value::Array(_) => {
                return Err(JsonRpcResponse::error(
                    None,
                    JsonRpcError::invalid_request("batch requests are not supported"),
                ))
            }
            _ => {
                return Err(JsonRpcResponse::error(
                    None,
                    JsonRpcError::invalid_request("request must be an object"),
                ))
            }
        };

        let id = match object.remove("id") {
            None => None,
            Some(raw) => match RequestId::from_value(&raw) {
                Some(id) => Some(id),
                None => {
                    return Err(JsonRpcResponse::error(
                        None,
                        JsonRpcError::invalid_request("id must be a string or an integer"),
                    ))
                }
            },
        };
        let reject = |details: &str| {
            JsonRpcResponse::error(id.clone(), JsonRpcError::invalid_request(details))
        };

        match object.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(_) => return Err(reject("jsonrpc must be \"2.0\"")),
            None => return Err(reject("missing required field: jsonrpc")),
        }

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            Some(_) => return Err(reject("method must be a string")),
            None => return Err(reject("missing required field: method")),
        };

        let params = match object.remove("params") {
            None | Some(Value::Null) => None,
            Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
            Some(_) => return Err(reject("params must be an object or an array")),
        };

        Ok(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method,
            params,
        })
    }

    /// Handle a validated request.
    ///
    /// Returns `None` for notifications: their handler still runs, but any
    /// failure is logged and dropped.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(
            "JSON-RPC: method={}, id={:?}",
            request.method, request.id
        );

        let Some(handler) = self.methods.get(&request.method) else {
            if request.is_notification() {
                debug!("Ignoring notification for unknown method {}", request.method);
                return None;
            }
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::method_not_found(&request.method),
            ));
        };

        let outcome = handler(request.params).await;

        match (request.id, outcome) {
            (None, Ok(_)) => None,
            (None, Err(e)) => {
                warn!("Notification {} failed: {}", request.method, e);
                None
            }
            (Some(id), Ok(result)) => Some(JsonRpcResponse::success(Some(id), result)),
            (Some(id), Err(e)) => {
                debug!("Method {} failed: {}", request.method, e);
                Some(JsonRpcResponse::error(Some(id), e.into_jsonrpc()))
            }
        }
    }
}
