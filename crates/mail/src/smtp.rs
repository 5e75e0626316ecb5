//! SMTP-backed mail gateway.

use std::time::Duration;

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::{MailError, MailGateway};

const DEFAULT_FROM_NAME: &str = "Course Platform";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// SMTP relay settings, sourced from the environment.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from_name: String,
    pub from_address: String,
    /// Cap on a single delivery attempt so a stuck provider cannot block a
    /// consumer's FIFO indefinitely.
    pub timeout: Duration,
}

impl MailSettings {
    /// Read settings from `SMTP_HOST` / `SMTP_USERNAME` / `SMTP_PASSWORD`
    /// (plus optional `MAIL_FROM_NAME`, `MAIL_FROM_ADDRESS`, `SMTP_TIMEOUT_SECS`).
    ///
    /// Returns `None` when any required variable is missing; callers then fall
    /// back to [`crate::NoopMailer`] rather than refusing to start.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;
        let username = std::env::var("SMTP_USERNAME").ok()?;
        let password = std::env::var("SMTP_PASSWORD").ok()?;
        let from_name =
            std::env::var("MAIL_FROM_NAME").unwrap_or_else(|_| DEFAULT_FROM_NAME.to_string());
        let from_address =
            std::env::var("MAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let timeout = std::env::var("SMTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Some(Self {
            host,
            username,
            password,
            from_name,
            from_address,
            timeout,
        })
    }
}

/// Mail gateway backed by an SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: MailSettings) -> Result<Self, MailError> {
        let from: Mailbox = format!("{} <{}>", settings.from_name, settings.from_address)
            .parse()
            .map_err(|e| MailError::Address(format!("from address: {e}")))?;

        let transport = SmtpTransport::relay(&settings.host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .credentials(Credentials::new(settings.username, settings.password))
            .timeout(Some(settings.timeout))
            .build();

        Ok(Self { transport, from })
    }
}

impl MailGateway for SmtpMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let recipient: Mailbox = to
            .parse()
            .map_err(|e| MailError::Address(format!("{to}: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MailError::Message(e.to_string()))?;

        self.transport
            .send(&message)
            .map_err(|e| MailError::Transport(e.to_string()))?;

        info!(to, subject, "email sent");
        Ok(())
    }
}
