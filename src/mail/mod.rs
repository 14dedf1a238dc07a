pub mod smtp;

use async_trait::async_trait;
use lettre::Message;
use serde::Serialize;

use crate::error::{ApiError, Result};

pub use smtp::SmtpMailer;

/// Caller-supplied SMTP credentials; one transport per request.
#[derive(Debug, Clone)]
pub struct SmtpCredentials {
    pub user: String,
    pub pass: String,
    pub server: String,
    pub port: u16,
}

/// Decoded PDF attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub reply_to: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<Attachment>,
}

/// Seam between message assembly and actual delivery, so batch semantics
/// are testable without a live SMTP server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: Message) -> Result<()>;
}

/// What the HTTP handlers program against; [`SmtpMailer`] is the real
/// implementation.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, creds: &SmtpCredentials, email: &OutgoingEmail) -> Result<String>;
    async fn send_batch(&self, creds: &SmtpCredentials, items: &[OutgoingEmail]) -> BatchSummary;
}

#[async_trait]
impl EmailSender for SmtpMailer {
    async fn send(&self, creds: &SmtpCredentials, email: &OutgoingEmail) -> Result<String> {
        SmtpMailer::send(self, creds, email).await
    }

    async fn send_batch(&self, creds: &SmtpCredentials, items: &[OutgoingEmail]) -> BatchSummary {
        SmtpMailer::send_batch(self, creds, items).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl From<ApiError> for ItemError {
    fn from(err: ApiError) -> Self {
        Self {
            message: err.message,
            kind: err.kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub success: bool,
    pub message: String,
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchSummary {
    pub fn from_results(results: Vec<BatchItemResult>) -> Self {
        let total = results.len();
        let sent = results.iter().filter(|r| r.success).count();
        let failed = total - sent;
        let message = if failed == 0 {
            "All emails sent"
        } else if sent > 0 {
            "Partial success"
        } else {
            "All failed"
        };
        Self {
            success: failed == 0,
            message: message.to_string(),
            total,
            sent,
            failed,
            results,
        }
    }
}
