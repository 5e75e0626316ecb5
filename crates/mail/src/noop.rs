//! No-op mail gateway for unconfigured environments.

use tracing::info;

use crate::{MailError, MailGateway};

/// Logs the intent to send and drops the message.
///
/// Selected when SMTP credentials are absent, so a dev box never crashes (or
/// accidentally emails anyone) just because notifications are wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMailer;

impl NoopMailer {
    pub fn new() -> Self {
        Self
    }
}

impl MailGateway for NoopMailer {
    fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
        info!(to, subject, "email not sent (mail transport not configured)");
        Ok(())
    }
}
