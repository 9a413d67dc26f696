//! Outgoing mail
//!
//! `EmailSender` is the only mail capability the rest of the crate uses.
//! `SmtpSender` delivers through an authenticated SMTP relay and
//! `MemorySender` keeps messages in memory.

mod smtp;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

pub use smtp::SmtpSender;

/// A message ready to be sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub html_body: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    /// Files attached as `application/octet-stream`
    pub attachments: Vec<PathBuf>,
}

impl Email {
    pub fn new(subject: impl Into<String>, html_body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            html_body: html_body.into(),
            ..Self::default()
        }
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    pub fn attach(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Email has no recipients")]
    NoRecipients,

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

// =========================================================================
// MemorySender
// =========================================================================

#[derive(Default)]
struct Outbox {
    sent: Vec<Email>,
    failures_left: u32,
}

/// Sender that records messages instead of delivering them
#[derive(Clone, Default)]
pub struct MemorySender {
    outbox: Arc<Mutex<Outbox>>,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` sends with a transport error
    pub async fn fail_next(&self, count: u32) {
        self.outbox.lock().await.failures_left = count;
    }

    pub async fn sent(&self) -> Vec<Email> {
        self.outbox.lock().await.sent.clone()
    }
}

#[async_trait]
impl EmailSender for MemorySender {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        if email.to.is_empty() {
            return Err(MailError::NoRecipients);
        }

        let mut outbox = self.outbox.lock().await;
        if outbox.failures_left > 0 {
            outbox.failures_left -= 1;
            return Err(MailError::Transport("connection refused".to_string()));
        }
        outbox.sent.push(email.clone());
        Ok(())
    }
}
