use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum MailError {
    /// Transport hiccup worth retrying (connection refused, 4xx response).
    #[error("transient mail failure: {0}")]
    Transient(String),
    /// Rejected outright (bad recipient, 5xx response). Never retried.
    #[error("permanent mail failure: {0}")]
    Permanent(String),
}

impl MailError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Transient(_))
    }
}

/// Transport seam for the dispatcher. The core hands over recipient, subject
/// and rendered body and stays agnostic to the wire.
pub trait Mailer: Send + Sync {
    fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

#[derive(Debug)]
pub struct SmtpMailer {
    server: String,
    port: u16,
    credentials: Credentials,
    from_header: String,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, MailError> {
        let server = config.server.trim().to_string();
        if server.is_empty() {
            return Err(MailError::Permanent("smtp server is not configured".into()));
        }
        let from_email = config.from_email.trim().to_string();
        if from_email.is_empty() {
            return Err(MailError::Permanent(
                "smtp sender address is not configured".into(),
            ));
        }

        Ok(Self {
            server,
            port: config.port,
            credentials: Credentials::new(config.username.clone(), config.password.clone()),
            from_header: format!("{} <{}>", config.from_name, from_email),
        })
    }

    fn build_transport(&self) -> Result<SmtpTransport, MailError> {
        Ok(SmtpTransport::relay(&self.server)
            .map_err(|err| MailError::Transient(format!("smtp relay error: {err}")))?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build())
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        let message = Message::builder()
            .from(
                self.from_header
                    .parse()
                    .map_err(|err| MailError::Permanent(format!("invalid from address: {err}")))?,
            )
            .to(recipient
                .parse()
                .map_err(|err| MailError::Permanent(format!("invalid recipient: {err}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|err| MailError::Permanent(format!("unable to build message: {err}")))?;

        let transport = self.build_transport()?;
        transport.send(&message).map_err(|err| {
            if err.is_permanent() {
                MailError::Permanent(err.to_string())
            } else {
                MailError::Transient(err.to_string())
            }
        })?;

        Ok(())
    }
}
