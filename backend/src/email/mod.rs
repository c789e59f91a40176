//! Email sending over SMTP.
//!
//! [`EmailOperations`] implements the email tools on top of a
//! [`MailTransport`]. Every delivery failure is reported inside the tool
//! payload as `{"success": false, "error": ...}`.

mod operations;
mod smtp;
mod tools;

pub use operations::{render_template, EmailOperations};
pub use smtp::SmtpMailer;
pub use tools::register_email_tools;

use async_trait::async_trait;
use lettre::Message;
use std::time::Duration;

/// Error type for mail operations.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("Invalid attachment '{0}': content is not valid base64")]
    Attachment(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),
}

pub type Result<T> = std::result::Result<T, MailError>;

/// Outcome of a successful connection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCheck {
    /// True if the server accepted the configured credentials.
    pub authenticated: bool,
}

/// Trait for mail delivery backends.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver a message to every recipient of its envelope.
    async fn send(&self, message: Message) -> Result<()>;

    /// Connect to the server and check that it accepts us.
    async fn verify(&self) -> Result<ConnectionCheck>;
}

/// Connection security used to talk to the SMTP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// No encryption.
    Plain,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    /// TLS from the first byte.
    Implicit,
}

/// SMTP server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Forces STARTTLS on or off; `None` picks by port.
    pub use_tls: Option<bool>,
    pub timeout: Duration,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: String::new(),
            use_tls: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl SmtpSettings {
    /// Connection security for these settings.
    ///
    /// Port 465 always uses implicit TLS. Otherwise `use_tls` decides, and
    /// when it is unset port 25 is plain and every other port uses STARTTLS.
    pub fn security(&self) -> SmtpSecurity {
        match (self.port, self.use_tls) {
            (465, _) => SmtpSecurity::Implicit,
            (_, Some(true)) => SmtpSecurity::StartTls,
            (_, Some(false)) => SmtpSecurity::Plain,
            (25, None) => SmtpSecurity::Plain,
            (_, None) => SmtpSecurity::StartTls,
        }
    }

    /// True if any form of TLS is used.
    pub fn uses_tls(&self) -> bool {
        self.security() != SmtpSecurity::Plain
    }

    /// True if both a user and a password are configured.
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16, use_tls: Option<bool>) -> SmtpSettings {
        SmtpSettings {
            port,
            use_tls,
            ..Default::default()
        }
    }

    #[test]
    fn test_security_by_port() {
        assert_eq!(settings(587, None).security(), SmtpSecurity::StartTls);
        assert_eq!(settings(2525, None).security(), SmtpSecurity::StartTls);
        assert_eq!(settings(25, None).security(), SmtpSecurity::Plain);
        assert_eq!(settings(465, None).security(), SmtpSecurity::Implicit);
    }

    #[test]
    fn test_use_tls_overrides_port() {
        assert_eq!(settings(587, Some(false)).security(), SmtpSecurity::Plain);
        assert_eq!(settings(25, Some(true)).security(), SmtpSecurity::StartTls);
        assert_eq!(settings(465, Some(false)).security(), SmtpSecurity::Implicit);
        assert!(!settings(1025, Some(false)).uses_tls());
    }

    #[test]
    fn test_has_credentials() {
        let mut smtp = SmtpSettings::default();
        assert!(!smtp.has_credentials());

        smtp.user = "bot@example.com".to_string();
        assert!(!smtp.has_credentials());

        smtp.password = "secret".to_string();
        assert!(smtp.has_credentials());
    }
}
