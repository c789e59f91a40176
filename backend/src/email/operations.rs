//! Email tool operations.

use super::{MailError, MailTransport, Result, SmtpSettings};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use mcp_sendmail_types::email::{SendBulkEmailArgs, SendEmailArgs, SendTemplateEmailArgs};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Replace every `{name}` placeholder in `template` with its variable.
///
/// String values are inserted verbatim, any other JSON value as its JSON
/// text. Placeholders without a variable are left untouched.
pub fn render_template(template: &str, variables: &Map<String, Value>) -> String {
    variables
        .iter()
        .fold(template.to_string(), |body, (name, value)| {
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            body.replace(&format!("{{{}}}", name), &replacement)
        })
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address.trim().parse().map_err(|e: lettre::address::AddressError| {
        MailError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Email operations backing the email tools.
pub struct EmailOperations {
    settings: SmtpSettings,
    mailer: Arc<dyn MailTransport>,
}

impl EmailOperations {
    pub fn new(settings: SmtpSettings, mailer: Arc<dyn MailTransport>) -> Self {
        Self { settings, mailer }
    }

    /// Send a single email.
    pub async fn send_email(&self, args: SendEmailArgs) -> Value {
        match self.deliver(&args).await {
            Ok(recipients) => {
                info!("Email sent successfully to {}", args.to);
                json!({
                    "success": true,
                    "message": format!("Email sent successfully to {}", args.to),
                    "recipients": recipients,
                })
            }
            Err(e) => {
                warn!("Failed to send email to {}: {}", args.to, e);
                json!({
                    "success": false,
                    "error": e.to_string(),
                })
            }
        }
    }

    /// Send the same email to every recipient, one message each.
    pub async fn send_bulk_email(&self, args: SendBulkEmailArgs) -> Value {
        let mut results = Vec::with_capacity(args.recipients.len());
        let mut success_count = 0usize;

        for recipient in &args.recipients {
            let mut single = SendEmailArgs::new(recipient, &args.subject, &args.body);
            single.from_addr = args.from_addr.clone();
            single.html = args.html;

            let result = self.send_email(single).await;
            if result.get("success").and_then(Value::as_bool) == Some(true) {
                success_count += 1;
            }
            results.push(json!({"recipient": recipient, "result": result}));
        }

        let total = args.recipients.len();
        let failed_count = total - success_count;
        info!(
            "Bulk email: {} of {} sent ({} failed)",
            success_count, total, failed_count
        );
        json!({
            "success": failed_count == 0,
            "total": total,
            "success_count": success_count,
            "failed_count": failed_count,
            "results": results,
        })
    }

    /// Render a template and send it as a single email.
    pub async fn send_template_email(&self, args: SendTemplateEmailArgs) -> Value {
        let body = render_template(&args.template, &args.variables);
        let mut single = SendEmailArgs::new(args.to, args.subject, body);
        single.from_addr = args.from_addr;
        single.html = args.html;
        self.send_email(single).await
    }

    /// Check that the SMTP server is reachable and accepts us.
    pub async fn verify_connection(&self) -> Value {
        match self.mailer.verify().await {
            Ok(check) => {
                let note = if check.authenticated {
                    " (authenticated)"
                } else if self.settings.has_credentials() {
                    " (no authentication)"
                } else {
                    ""
                };
                info!(
                    "SMTP connection to {}:{} verified{}",
                    self.settings.host, self.settings.port, note
                );
                json!({
                    "success": true,
                    "message": format!("SMTP connection verified successfully{}", note),
                    "server": self.settings.host,
                    "port": self.settings.port,
                    "tls": self.settings.uses_tls(),
                    "authenticated": check.authenticated,
                })
            }
            Err(e) => {
                warn!("SMTP connection failed: {}", e);
                json!({
                    "success": false,
                    "error": e.to_string(),
                    "server": self.settings.host,
                    "port": self.settings.port,
                })
            }
        }
    }

    async fn deliver(&self, args: &SendEmailArgs) -> Result<Vec<String>> {
        let message = self.build_message(args)?;
        self.mailer.send(message).await?;

        Ok(std::iter::once(&args.to)
            .chain(&args.cc)
            .chain(&args.bcc)
            .cloned()
            .collect())
    }

    /// Build the MIME message for `args`.
    ///
    /// The sender defaults to the SMTP user. Attachments missing a filename
    /// or content are skipped.
    pub fn build_message(&self, args: &SendEmailArgs) -> Result<Message> {
        let from = args
            .from_addr
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .unwrap_or(&self.settings.user);

        let mut builder = Message::builder()
            .from(parse_mailbox(from)?)
            .to(parse_mailbox(&args.to)?)
            .subject(args.subject.as_str());
        for cc in &args.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }
        for bcc in &args.bcc {
            builder = builder.bcc(parse_mailbox(bcc)?);
        }

        let body = if args.html {
            SinglePart::html(args.body.clone())
        } else {
            SinglePart::plain(args.body.clone())
        };
        let mut multipart = MultiPart::mixed().singlepart(body);

        for attachment in &args.attachments {
            let filename = attachment.filename.as_deref().filter(|f| !f.is_empty());
            let content = attachment.content.as_deref().filter(|c| !c.is_empty());
            let (Some(filename), Some(content)) = (filename, content) else {
                debug!("Skipping attachment without filename or content");
                continue;
            };
            let bytes = BASE64
                .decode(content.trim())
                .map_err(|_| MailError::Attachment(filename.to_string()))?;
            let content_type = ContentType::parse("application/octet-stream")
                .map_err(|e| MailError::Build(e.to_string()))?;
            multipart = multipart
                .singlepart(Attachment::new(filename.to_string()).body(bytes, content_type));
        }

        builder
            .multipart(multipart)
            .map_err(|e| MailError::Build(e.to_string()))
    }
}
