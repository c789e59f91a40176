//! Application state management.

use crate::config::Config;
use crate::email::{register_email_tools, EmailOperations, MailTransport, SmtpMailer, SmtpSettings};
use crate::jsonrpc::Dispatcher;
use crate::mcp::{McpHandler, StreamableTransport};
use crate::tools::ToolRegistry;
use anyhow::Context;
use mcp_sendmail_types::{HealthResponse, LATEST_PROTOCOL_VERSION, SERVER_NAME};
use std::sync::Arc;
use tracing::info;

/// Human-readable transport name reported by `/health`.
pub const TRANSPORT_NAME: &str = "MCP Streamable HTTP";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Session-aware Streamable HTTP transport
    transport: StreamableTransport,
    /// JSON-RPC method table, shared with the stateless endpoints
    dispatcher: Arc<Dispatcher>,
    /// Registered email tools
    tools: Arc<ToolRegistry>,
    /// SMTP target, reported by the health endpoint
    smtp: SmtpSettings,
}

impl AppState {
    /// Create application state that delivers through a real SMTP connection.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mailer = SmtpMailer::new(config.smtp.clone())
            .context("Failed to configure SMTP transport")?;
        Self::with_mail_transport(config, Arc::new(mailer))
    }

    /// Create application state around an arbitrary mail transport.
    pub fn with_mail_transport(
        config: &Config,
        mailer: Arc<dyn MailTransport>,
    ) -> anyhow::Result<Self> {
        let operations = Arc::new(EmailOperations::new(config.smtp.clone(), mailer));

        let mut tools = ToolRegistry::new();
        register_email_tools(&mut tools, operations)?;
        let tools = Arc::new(tools);

        let mut dispatcher = Dispatcher::new();
        McpHandler::register(&mut dispatcher, Arc::clone(&tools))?;
        let dispatcher = Arc::new(dispatcher);

        let transport = StreamableTransport::new(Arc::clone(&dispatcher), config.sessions.clone());

        info!(
            "Application state ready: {} tools, {} methods, SMTP {}:{}",
            tools.len(),
            dispatcher.method_count(),
            config.smtp.host,
            config.smtp.port
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                transport,
                dispatcher,
                tools,
                smtp: config.smtp.clone(),
            }),
        })
    }

    pub fn transport(&self) -> &StreamableTransport {
        &self.inner.transport
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.inner.tools
    }

    pub fn smtp(&self) -> &SmtpSettings {
        &self.inner.smtp
    }

    /// Snapshot for the health endpoint.
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            service: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            transport: TRANSPORT_NAME.to_string(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            smtp_host: self.inner.smtp.host.clone(),
            smtp_port: self.inner.smtp.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{ConnectionCheck, MailError};
    use async_trait::async_trait;
    use lettre::Message;

    struct NullTransport;

    #[async_trait]
    impl MailTransport for NullTransport {
        async fn send(&self, _message: Message) -> Result<(), MailError> {
            Ok(())
        }

        async fn verify(&self) -> Result<ConnectionCheck, MailError> {
            Ok(ConnectionCheck {
                authenticated: false,
            })
        }
    }

    fn test_state() -> AppState {
        let mut config = Config::default();
        config.smtp.host = "mail.example.com".to_string();
        config.smtp.port = 2525;
        AppState::with_mail_transport(&config, Arc::new(NullTransport)).unwrap()
    }

    #[test]
    fn test_state_registers_email_tools() {
        let state = test_state();

        let names: Vec<String> = state.tools().list().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "send_email",
                "send_bulk_email",
                "send_template_email",
                "verify_connection"
            ]
        );
    }

    #[test]
    fn test_state_registers_mcp_methods() {
        let state = test_state();

        for method in ["initialize", "notifications/initialized", "ping", "tools/list", "tools/call"] {
            assert!(state.dispatcher().has_method(method), "missing {method}");
        }
    }

    #[test]
    fn test_health_reports_smtp_target() {
        let health = test_state().health();

        assert_eq!(health.status, "healthy");
        assert_eq!(health.service, SERVER_NAME);
        assert_eq!(health.transport, TRANSPORT_NAME);
        assert_eq!(health.protocol_version, LATEST_PROTOCOL_VERSION);
        assert_eq!(health.smtp_host, "mail.example.com");
        assert_eq!(health.smtp_port, 2525);
    }

    #[tokio::test]
    async fn test_transport_uses_configured_sessions() {
        let state = test_state();

        assert_eq!(state.transport().settings(), &Config::default().sessions);
        assert_eq!(state.transport().sessions().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_state_with_smtp_mailer() {
        let state = AppState::new(&Config::default()).unwrap();
        assert_eq!(state.smtp().host, "localhost");
    }
}
