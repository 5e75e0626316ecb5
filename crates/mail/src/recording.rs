//! In-memory mail gateway for tests.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::{MailError, MailGateway};

/// A message captured by [`RecordingMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records every send in order; can be told to reject specific addresses to
/// exercise failure paths.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future send to `address` fail with a transport error.
    pub fn reject(&self, address: impl Into<String>) {
        self.rejected.lock().unwrap().insert(address.into());
    }

    /// All captured messages, in send order.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    /// Captured messages addressed to `to`, in send order.
    pub fn sent_to(&self, to: &str) -> Vec<SentEmail> {
        self.sent().into_iter().filter(|m| m.to == to).collect()
    }
}

impl MailGateway for RecordingMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if self.rejected.lock().unwrap().contains(to) {
            return Err(MailError::Transport(format!("rejected by test: {to}")));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
