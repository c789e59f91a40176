//! Streamable HTTP transport logic, independent of the HTTP framework.
//!
//! A POST carries one JSON-RPC message. Responses produced for a bound
//! session are appended to that session's event log before they are
//! returned, so the same payload is available both as the POST response and
//! on the session's SSE stream.

use super::handler::METHOD_INITIALIZE;
use super::session::{
    EventId, RetentionPolicy, Session, SessionError, SessionStore, StoredEvent, StreamHandle,
};
use super::sweeper::SessionSweeper;
use crate::jsonrpc::{decode_body, Dispatcher};
use mcp_sendmail_types::jsonrpc::{JsonRpcError, JsonRpcResponse};
use mcp_sendmail_types::mcp::{is_supported_protocol_version, LATEST_PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Session lifetime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Sessions idle for this long are evicted.
    pub idle_timeout: Duration,
    /// How often the sweeper looks for idle sessions.
    pub sweep_interval: Duration,
    pub retention: RetentionPolicy,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            retention: RetentionPolicy::default(),
        }
    }
}

/// Errors surfaced at the HTTP level.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Mcp-Session-Id header required")]
    MissingSessionId,

    /// A non-initialize request arrived without a session.
    #[error("No session: send initialize first (got {0})")]
    SessionRequired(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("Invalid Last-Event-Id: {0}")]
    InvalidLastEventId(String),

    /// The body was not JSON or not a valid JSON-RPC envelope. Carries the
    /// ready-made error envelope.
    #[error("Malformed JSON-RPC message")]
    Malformed(Box<JsonRpcResponse>),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    fn malformed(response: JsonRpcResponse) -> Self {
        TransportError::Malformed(Box::new(response))
    }
}

/// Result of a POST.
#[derive(Debug)]
pub enum PostOutcome {
    /// A response that has been appended to the session's log.
    Response {
        session: Arc<Session>,
        event: StoredEvent,
        /// True when this POST created the session.
        created: bool,
    },
    /// A notification was handled; there is nothing to return.
    Accepted { session: Arc<Session> },
    /// An `initialize` failed; no session was created.
    Rejected(JsonRpcResponse),
}

/// The MCP Streamable HTTP transport.
pub struct StreamableTransport {
    sessions: SessionStore,
    dispatcher: Arc<Dispatcher>,
    settings: TransportSettings,
    sweeper: Mutex<Option<SessionSweeper>>,
}

impl StreamableTransport {
    pub fn new(dispatcher: Arc<Dispatcher>, settings: TransportSettings) -> Self {
        Self {
            sessions: SessionStore::new(settings.retention),
            dispatcher,
            settings,
            sweeper: Mutex::new(None),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Start the idle-session sweeper. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_none() {
            *sweeper = Some(SessionSweeper::spawn(
                self.sessions.clone(),
                self.settings.sweep_interval,
                self.settings.idle_timeout,
            ));
        }
    }

    /// Stop the sweeper, then close every session so open streams end.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().await.take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        let closed = self.sessions.close_all().await;
        info!("MCP transport shut down ({} session(s) closed)", closed);
    }

    /// Handle one POSTed JSON-RPC message.
    ///
    /// Without a session id only `initialize` is accepted; a successful
    /// initialize creates the session bound to the negotiated version.
    pub async fn handle_post(
        &self,
        session_id: Option<&str>,
        protocol_version: Option<&str>,
        body: &[u8],
    ) -> Result<PostOutcome, TransportError> {
        if let Some(version) = protocol_version {
            if !is_supported_protocol_version(version) {
                return Err(TransportError::UnsupportedProtocolVersion(
                    version.to_string(),
                ));
            }
        }

        match session_id {
            Some(id) => self.handle_bound(id, body).await,
            None => self.handle_unbound(body).await,
        }
    }

    async fn handle_bound(&self, id: &str, body: &[u8]) -> Result<PostOutcome, TransportError> {
        let session = self.sessions.get(id).await?;
        session.touch();
        let request = decode_body(body)
            .and_then(Dispatcher::validate)
            .map_err(TransportError::malformed)?;

        // The negotiated version is fixed for the lifetime of the session
        if request.method == METHOD_INITIALIZE {
            debug!("Rejecting initialize on existing session {}", session.id());
            return Err(TransportError::malformed(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request("session already initialized"),
            )));
        }

        match self.dispatcher.handle(request).await {
            Some(response) => self.deliver(session, &response, false),
            None => Ok(PostOutcome::Accepted { session }),
        }
    }

    async fn handle_unbound(&self, body: &[u8]) -> Result<PostOutcome, TransportError> {
        let request = decode_body(body)
            .and_then(Dispatcher::validate)
            .map_err(TransportError::malformed)?;

        if request.method != METHOD_INITIALIZE {
            debug!("Rejecting {} without a session", request.method);
            return Err(TransportError::SessionRequired(request.method));
        }
        if request.is_notification() {
            return Err(TransportError::malformed(JsonRpcResponse::error(
                None,
                JsonRpcError::invalid_request("initialize must carry an id"),
            )));
        }

        let Some(response) = self.dispatcher.handle(request).await else {
            return Err(TransportError::SessionRequired(METHOD_INITIALIZE.to_string()));
        };
        if response.is_error() {
            return Ok(PostOutcome::Rejected(response));
        }

        let negotiated = response
            .result
            .as_ref()
            .and_then(|result| result.get("protocolVersion"))
            .and_then(|v| v.as_str())
            .unwrap_or(LATEST_PROTOCOL_VERSION);
        let session = self.sessions.create(negotiated).await;
        self.deliver(session, &response, true)
    }

    fn deliver(
        &self,
        session: Arc<Session>,
        response: &JsonRpcResponse,
        created: bool,
    ) -> Result<PostOutcome, TransportError> {
        let payload = serde_json::to_value(response)?;
        let event = session.append(payload)?;
        debug!("Session {} recorded event {}", session.id(), event.id);
        Ok(PostOutcome::Response {
            session,
            event,
            created,
        })
    }

    /// Attach the SSE consumer of a session.
    ///
    /// `last_event_id` is the raw `Last-Event-Id` header value.
    pub async fn open_stream(
        &self,
        session_id: Option<&str>,
        last_event_id: Option<&str>,
    ) -> Result<StreamHandle, TransportError> {
        let id = session_id.ok_or(TransportError::MissingSessionId)?;
        let cursor = last_event_id.map(parse_event_id).transpose()?;
        let handle = self.sessions.attach_stream(id, cursor).await?;
        info!(
            "MCP stream attached for session {} (resume from {:?})",
            id, cursor
        );
        Ok(handle)
    }
}

fn parse_event_id(raw: &str) -> Result<EventId, TransportError> {
    raw.trim()
        .parse()
        .map_err(|_| TransportError::InvalidLastEventId(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::McpHandler;
    use crate::mcp::session::StreamItem;
    use crate::tools::ToolRegistry;
    use mcp_sendmail_types::jsonrpc::{error_codes, RequestId};
    use serde_json::{json, Value};

    fn transport() -> StreamableTransport {
        let mut tools = ToolRegistry::new();
        tools
            .register("echo", "Echo", json!({"type": "object"}), |arguments| async move {
                Ok(json!({"success": true, "echo": arguments}))
            })
            .unwrap();
        let mut dispatcher = Dispatcher::new();
        McpHandler::register(&mut dispatcher, Arc::new(tools)).unwrap();
        StreamableTransport::new(Arc::new(dispatcher), TransportSettings::default())
    }

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    async fn initialize(transport: &StreamableTransport) -> Arc<Session> {
        let outcome = transport
            .handle_post(
                None,
                None,
                &body(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {"protocolVersion": "2025-03-26"}
                })),
            )
            .await
            .unwrap();
        match outcome {
            PostOutcome::Response {
                session, created, ..
            } => {
                assert!(created);
                session
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_creates_session_with_negotiated_version() {
        let transport = transport();
        let session = initialize(&transport).await;

        assert_eq!(session.protocol_version(), "2025-03-26");
        assert_eq!(transport.sessions().session_count().await, 1);
        // The initialize response is the first event of the log.
        let events = session.events_after(None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, 1);
        assert_eq!(events[0].payload["result"]["protocolVersion"], "2025-03-26");
    }

    #[tokio::test]
    async fn test_request_without_session_rejected() {
        let transport = transport();

        let result = transport
            .handle_post(
                None,
                None,
                &body(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
            )
            .await;

        assert!(matches!(result, Err(TransportError::SessionRequired(m)) if m == "tools/list"));
        assert_eq!(transport.sessions().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_initialize_creates_no_session() {
        let transport = transport();

        let result = transport
            .handle_post(
                None,
                None,
                &body(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": [1]})),
            )
            .await
            .unwrap();

        match result {
            PostOutcome::Rejected(response) => {
                assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(transport.sessions().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_bound_request_appends_response() {
        let transport = transport();
        let session = initialize(&transport).await;

        let outcome = transport
            .handle_post(
                Some(session.id()),
                Some("2025-03-26"),
                &body(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})),
            )
            .await
            .unwrap();

        match outcome {
            PostOutcome::Response { event, created, .. } => {
                assert!(!created);
                assert_eq!(event.id, 2);
                assert_eq!(event.payload["id"], 2);
                assert_eq!(event.payload["result"], json!({}));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_event() {
        let transport = transport();
        let session = initialize(&transport).await;

        let outcome = transport
            .handle_post(
                Some(session.id()),
                None,
                &body(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, PostOutcome::Accepted { .. }));
        assert_eq!(session.events_after(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let transport = transport();

        let result = transport
            .handle_post(
                Some("does-not-exist"),
                None,
                &body(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            )
            .await;

        assert!(matches!(
            result,
            Err(TransportError::Session(SessionError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let transport = transport();
        let session = initialize(&transport).await;

        let result = transport
            .handle_post(Some(session.id()), None, b"{not json")
            .await;

        match result {
            Err(TransportError::Malformed(response)) => {
                assert_eq!(response.error.unwrap().code, error_codes::PARSE_ERROR);
                assert!(response.id.is_none());
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(session.events_after(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_initialize_is_rejected() {
        let transport = transport();
        let session = initialize(&transport).await;

        let result = transport
            .handle_post(
                Some(session.id()),
                None,
                &body(json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "initialize",
                    "params": {"protocolVersion": "2024-11-05"}
                })),
            )
            .await;

        match result {
            Err(TransportError::Malformed(response)) => {
                assert_eq!(response.error.unwrap().code, error_codes::INVALID_REQUEST);
                assert_eq!(response.id, Some(RequestId::Number(2)));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(session.protocol_version(), "2025-03-26");
        assert_eq!(session.events_after(None).unwrap().len(), 1);
        assert_eq!(transport.sessions().session_count().await, 1);
    }

    #[tokio::test]
    async fn test_malformed_post_still_refreshes_activity() {
        let transport = transport();
        let session = initialize(&transport).await;
        let before = session.last_activity();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = transport
            .handle_post(Some(session.id()), None, b"{not json")
            .await;

        assert!(matches!(result, Err(TransportError::Malformed(_))));
        assert!(session.last_activity() > before);
    }

    #[tokio::test]
    async fn test_unsupported_protocol_header() {
        let transport = transport();

        let result = transport
            .handle_post(None, Some("1999-01-01"), b"{}")
            .await;

        assert!(matches!(
            result,
            Err(TransportError::UnsupportedProtocolVersion(v)) if v == "1999-01-01"
        ));
    }

    #[tokio::test]
    async fn test_stream_sees_post_responses() {
        let transport = transport();
        let session = initialize(&transport).await;
        let mut stream = transport
            .open_stream(Some(session.id()), Some("1"))
            .await
            .unwrap();

        transport
            .handle_post(
                Some(session.id()),
                None,
                &body(json!({"jsonrpc": "2.0", "id": "abc", "method": "ping"})),
            )
            .await
            .unwrap();

        let item = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        match item {
            StreamItem::Event(event) => {
                assert_eq!(event.id, 2);
                assert_eq!(event.payload["id"], "abc");
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_stream_errors() {
        let transport = transport();
        let session = initialize(&transport).await;

        assert!(matches!(
            transport.open_stream(None, None).await,
            Err(TransportError::MissingSessionId)
        ));
        assert!(matches!(
            transport.open_stream(Some(session.id()), Some("abc")).await,
            Err(TransportError::InvalidLastEventId(_))
        ));
        assert!(matches!(
            transport.open_stream(Some(session.id()), Some("42")).await,
            Err(TransportError::Session(SessionError::UnknownEventId(42)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let transport = transport();
        transport.start().await;
        let session = initialize(&transport).await;

        transport.shutdown().await;

        assert!(session.is_closed());
        assert_eq!(transport.sessions().session_count().await, 0);
    }
}
