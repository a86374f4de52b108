//! Email sender boundary.
//!
//! The engine tolerates the transport failing: workflow steps that send
//! mail log the failure and carry on, so a down mail server never aborts
//! a signature or finalization.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// An email ready for dispatch, with both HTML and plain-text bodies.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Transport acknowledgement for a dispatched email.
#[derive(Debug, Clone)]
pub struct EmailReceipt {
    pub message_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<EmailReceipt, MailError>;
}

/// Logs the email instead of sending it. Default when no transport is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMailer;

#[async_trait]
impl EmailSender for NoopMailer {
    async fn send(&self, email: OutboundEmail) -> Result<EmailReceipt, MailError> {
        tracing::info!(to = %email.to, subject = %email.subject, "mail transport not configured, dropping email");
        Ok(EmailReceipt {
            message_id: format!("noop-{}", uuid::Uuid::new_v4()),
        })
    }
}

/// Captures sent emails for assertions; can be switched to fail every
/// send to exercise degrade paths.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = failing;
    }
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send(&self, email: OutboundEmail) -> Result<EmailReceipt, MailError> {
        if *self.failing.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(MailError::Transport("recording mailer set to fail".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email);
        Ok(EmailReceipt {
            message_id: format!("rec-{}", uuid::Uuid::new_v4()),
        })
    }
}
