//! SMTP delivery through `lettre`.

use super::{ConnectionCheck, MailError, MailTransport, Result, SmtpSecurity, SmtpSettings};
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::Error as SmtpError;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

type Transport = AsyncSmtpTransport<Tokio1Executor>;

fn smtp_error(err: SmtpError) -> MailError {
    MailError::Smtp(err.to_string())
}

/// True for errors where retrying without credentials makes sense: a 53x
/// reply, or the server offering no mechanism we can use.
fn is_auth_rejection(err: &SmtpError) -> bool {
    let rejected = err
        .status()
        .map(|code| code.to_string().starts_with("53"))
        .unwrap_or(false);
    rejected || err.is_client()
}

fn build_transport(settings: &SmtpSettings, credentials: Option<Credentials>) -> Result<Transport> {
    let builder = match settings.security() {
        SmtpSecurity::Implicit => Transport::relay(&settings.host).map_err(smtp_error)?,
        SmtpSecurity::StartTls => Transport::starttls_relay(&settings.host).map_err(smtp_error)?,
        SmtpSecurity::Plain => Transport::builder_dangerous(&settings.host),
    };
    let mut builder = builder
        .port(settings.port)
        .timeout(Some(settings.timeout));
    if let Some(credentials) = credentials {
        builder = builder.credentials(credentials);
    }
    Ok(builder.build())
}

/// Mail transport talking to a real SMTP server.
///
/// When credentials are configured they are tried first; if the server
/// rejects them the operation is retried without authentication.
pub struct SmtpMailer {
    authenticated: Option<Transport>,
    anonymous: Transport,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        let anonymous = build_transport(&settings, None)?;
        let authenticated = if settings.has_credentials() {
            let credentials = Credentials::new(settings.user.clone(), settings.password.clone());
            Some(build_transport(&settings, Some(credentials))?)
        } else {
            None
        };

        info!(
            "SMTP transport: {}:{} ({:?}, credentials: {})",
            settings.host,
            settings.port,
            settings.security(),
            settings.has_credentials()
        );
        Ok(Self {
            authenticated,
            anonymous,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> Result<()> {
        if let Some(transport) = &self.authenticated {
            match transport.send(message.clone()).await {
                Ok(response) => {
                    debug!("SMTP accepted message: {:?}", response.code());
                    return Ok(());
                }
                Err(e) if is_auth_rejection(&e) => {
                    warn!("SMTP authentication failed ({}), continuing without auth", e);
                }
                Err(e) => return Err(smtp_error(e)),
            }
        }

        let response = self.anonymous.send(message).await.map_err(smtp_error)?;
        debug!("SMTP accepted message: {:?}", response.code());
        Ok(())
    }

    async fn verify(&self) -> Result<ConnectionCheck> {
        if let Some(transport) = &self.authenticated {
            match transport.test_connection().await {
                Ok(true) => {
                    return Ok(ConnectionCheck {
                        authenticated: true,
                    })
                }
                Ok(false) => {
                    return Err(MailError::Smtp(
                        "server did not answer the connection check".to_string(),
                    ))
                }
                Err(e) if is_auth_rejection(&e) => {
                    warn!("SMTP authentication not required or failed: {}", e);
                }
                Err(e) => return Err(smtp_error(e)),
            }
        }

        if self.anonymous.test_connection().await.map_err(smtp_error)? {
            Ok(ConnectionCheck {
                authenticated: false,
            })
        } else {
            Err(MailError::Smtp(
                "server did not answer the connection check".to_string(),
            ))
        }
    }
}
