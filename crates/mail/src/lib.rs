//! Mail gateway: the single outbound-email seam of the notification pipeline.
//!
//! Three implementations behind one trait:
//! - [`SmtpMailer`] — production transport (SMTP relay, bounded per-call timeout);
//! - [`NoopMailer`] — used when credentials are absent; logs intent, never fails;
//! - [`RecordingMailer`] — in-memory double for tests.

mod noop;
mod recording;
mod smtp;

pub use noop::NoopMailer;
pub use recording::{RecordingMailer, SentEmail};
pub use smtp::{MailSettings, SmtpMailer};

use thiserror::Error;

/// Outbound email delivery failure.
///
/// Transport specifics are flattened to strings at this boundary so callers
/// do not depend on the underlying mail crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    /// Recipient or sender address did not parse.
    #[error("invalid mail address: {0}")]
    Address(String),

    /// The message itself could not be assembled.
    #[error("failed to build message: {0}")]
    Message(String),

    /// Provider/network failure while handing the message off.
    #[error("mail transport failure: {0}")]
    Transport(String),
}

/// Sends transactional email. Implementations must be safe to share across
/// the worker threads.
pub trait MailGateway: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}
