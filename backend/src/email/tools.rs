//! Registration of the email tools.

use super::EmailOperations;
use crate::tools::{parse_validated_arguments, ToolError, ToolRegistry};
use mcp_sendmail_types::email::{SendBulkEmailArgs, SendEmailArgs, SendTemplateEmailArgs};
use serde_json::json;
use std::sync::Arc;

const SENDER_DESCRIPTION: &str = "Sender email address (optional, defaults to SMTP_USER)";

/// Register `send_email`, `send_bulk_email`, `send_template_email` and
/// `verify_connection`, in that order.
pub fn register_email_tools(
    registry: &mut ToolRegistry,
    ops: Arc<EmailOperations>,
) -> Result<(), ToolError> {
    let email = Arc::clone(&ops);
    registry.register(
        "send_email",
        "Send an email with optional attachments",
        json!({
            "type": "object",
            "properties": {
                "to": {"type": "string", "description": "Recipient email address"},
                "subject": {"type": "string", "description": "Email subject"},
                "body": {"type": "string", "description": "Email body content"},
                "from_addr": {"type": "string", "description": SENDER_DESCRIPTION},
                "cc": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "List of CC recipients (optional)"
                },
                "bcc": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "List of BCC recipients (optional)"
                },
                "html": {
                    "type": "boolean",
                    "description": "Whether body is HTML (default: false for plain text)"
                },
                "attachments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "filename": {"type": "string"},
                            "content": {"type": "string", "description": "Base64 encoded content"}
                        }
                    },
                    "description": "List of attachments (optional)"
                }
            },
            "required": ["to", "subject", "body"]
        }),
        move |arguments| {
            let ops = Arc::clone(&email);
            async move {
                let args: SendEmailArgs = parse_validated_arguments(arguments)?;
                Ok(ops.send_email(args).await)
            }
        },
    )?;

    let bulk = Arc::clone(&ops);
    registry.register(
        "send_bulk_email",
        "Send the same email to multiple recipients",
        json!({
            "type": "object",
            "properties": {
                "recipients": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "List of recipient email addresses"
                },
                "subject": {"type": "string", "description": "Email subject"},
                "body": {"type": "string", "description": "Email body content"},
                "from_addr": {"type": "string", "description": SENDER_DESCRIPTION},
                "html": {"type": "boolean", "description": "Whether body is HTML (default: false)"}
            },
            "required": ["recipients", "subject", "body"]
        }),
        move |arguments| {
            let ops = Arc::clone(&bulk);
            async move {
                let args: SendBulkEmailArgs = parse_validated_arguments(arguments)?;
                Ok(ops.send_bulk_email(args).await)
            }
        },
    )?;

    let template = Arc::clone(&ops);
    registry.register(
        "send_template_email",
        "Send an email using a template with variable substitution",
        json!({
            "type": "object",
            "properties": {
                "to": {"type": "string", "description": "Recipient email address"},
                "subject": {"type": "string", "description": "Email subject"},
                "template": {
                    "type": "string",
                    "description": "Email template with {variable} placeholders"
                },
                "variables": {
                    "type": "object",
                    "description": "Dictionary of variable names and values to substitute"
                },
                "from_addr": {"type": "string", "description": SENDER_DESCRIPTION},
                "html": {
                    "type": "boolean",
                    "description": "Whether template is HTML (default: false)"
                }
            },
            "required": ["to", "subject", "template", "variables"]
        }),
        move |arguments| {
            let ops = Arc::clone(&template);
            async move {
                let args: SendTemplateEmailArgs = parse_validated_arguments(arguments)?;
                Ok(ops.send_template_email(args).await)
            }
        },
    )?;

    registry.register(
        "verify_connection",
        "Verify SMTP connection and credentials",
        json!({"type": "object", "properties": {}, "required": []}),
        move |_| {
            let ops = Arc::clone(&ops);
            async move { Ok(ops.verify_connection().await) }
        },
    )?;

    Ok(())
}
