//! SMTP delivery over lettre, with substring-based classification of raw
//! transport errors into the coarse error kinds callers see.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MessagePart, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use crate::error::{ApiError, ErrorKind, Result};

use super::{
    BatchItemResult, BatchSummary, MailTransport, OutgoingEmail, SmtpCredentials,
};

pub struct SmtpMailer;

impl SmtpMailer {
    pub fn new() -> Self {
        Self
    }

    /// One transport, one message; returns the assigned message id.
    pub async fn send(&self, creds: &SmtpCredentials, email: &OutgoingEmail) -> Result<String> {
        let transport = LettreTransport::open(creds)?;
        send_one(&transport, creds, email).await
    }

    /// Sends every item sequentially over a single pooled connection.
    /// One item's failure never blocks the rest.
    pub async fn send_batch(
        &self,
        creds: &SmtpCredentials,
        items: &[OutgoingEmail],
    ) -> BatchSummary {
        let transport = match LettreTransport::open(creds) {
            Ok(t) => t,
            Err(err) => {
                // transport never came up: every item fails the same way
                let results = items
                    .iter()
                    .map(|item| BatchItemResult {
                        to: item.to.clone(),
                        subject: item.subject.clone(),
                        success: false,
                        message_id: None,
                        error: Some(err.clone().into()),
                    })
                    .collect();
                return BatchSummary::from_results(results);
            }
        };
        deliver_batch(&transport, creds, items).await
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new()
    }
}

struct LettreTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl LettreTransport {
    fn open(creds: &SmtpCredentials) -> Result<Self> {
        // implicit TLS on 465, required STARTTLS otherwise
        let builder = if creds.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&creds.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&creds.server)
        }
        .map_err(|e| classify_smtp_error(&e.to_string()))?;

        let inner = builder
            .port(creds.port)
            .credentials(Credentials::new(creds.user.clone(), creds.pass.clone()))
            .pool_config(PoolConfig::new().max_size(1))
            .build();
        Ok(Self { inner })
    }
}

#[async_trait]
impl MailTransport for LettreTransport {
    async fn deliver(&self, message: Message) -> Result<()> {
        self.inner
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| classify_smtp_error(&e.to_string()))
    }
}

/// Builds and delivers a single message, returning its message id.
pub async fn send_one<T: MailTransport>(
    transport: &T,
    creds: &SmtpCredentials,
    email: &OutgoingEmail,
) -> Result<String> {
    let (message, message_id) = build_message(creds, email)?;
    transport.deliver(message).await?;
    tracing::info!(
        message_id = %message_id,
        recipients = email.to.len(),
        attachments = email.attachments.len(),
        "Email sent"
    );
    Ok(message_id)
}

pub async fn deliver_batch<T: MailTransport>(
    transport: &T,
    creds: &SmtpCredentials,
    items: &[OutgoingEmail],
) -> BatchSummary {
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        match send_one(transport, creds, item).await {
            Ok(message_id) => results.push(BatchItemResult {
                to: item.to.clone(),
                subject: item.subject.clone(),
                success: true,
                message_id: Some(message_id),
                error: None,
            }),
            Err(err) => {
                tracing::error!(error = %err, recipients = ?item.to, "Email failed (batch)");
                results.push(BatchItemResult {
                    to: item.to.clone(),
                    subject: item.subject.clone(),
                    success: false,
                    message_id: None,
                    error: Some(err.into()),
                });
            }
        }
    }
    BatchSummary::from_results(results)
}

fn parse_mailbox(addr: &str, kind: ErrorKind) -> Result<Mailbox> {
    addr.parse::<Mailbox>().map_err(|_| {
        ApiError::new(kind, format!("The recipient address {} is invalid", addr))
    })
}

fn build_message(creds: &SmtpCredentials, email: &OutgoingEmail) -> Result<(Message, String)> {
    let from = creds
        .user
        .parse::<Mailbox>()
        .map_err(|_| ApiError::validation(format!("Sender address {} is invalid", creds.user)))?;

    if email.to.is_empty() {
        return Err(ApiError::invalid_recipient("The recipient address is empty"));
    }

    let message_id = format!("{}@{}", Uuid::new_v4(), creds.server);
    let mut builder = Message::builder()
        .from(from)
        .message_id(Some(format!("<{}>", message_id)));
    for to in &email.to {
        builder = builder.to(parse_mailbox(to, ErrorKind::InvalidRecipient)?);
    }
    for cc in &email.cc {
        builder = builder.cc(parse_mailbox(cc, ErrorKind::InvalidRecipient)?);
    }
    for bcc in &email.bcc {
        builder = builder.bcc(parse_mailbox(bcc, ErrorKind::InvalidRecipient)?);
    }
    if let Some(reply_to) = &email.reply_to {
        builder = builder.reply_to(
            reply_to
                .parse::<Mailbox>()
                .map_err(|_| ApiError::validation(format!("Reply-to address {} is invalid", reply_to)))?,
        );
    }
    if let Some(subject) = &email.subject {
        builder = builder.subject(subject);
    }

    let body = email.body.clone().unwrap_or_default();
    // HTML with a plain-text fallback carrying the same content
    let alternative = MultiPart::alternative_plain_html(body.clone(), body);

    let message = if email.attachments.is_empty() {
        builder.multipart(alternative)
    } else {
        let pdf = ContentType::parse("application/pdf")
            .map_err(|e| ApiError::internal(format!("Content type error: {}", e)))?;
        let mut mixed = MultiPart::mixed().multipart(alternative);
        for attachment in &email.attachments {
            mixed = mixed.singlepart(
                MessagePart::new(attachment.filename.clone())
                    .body(attachment.content.clone(), pdf.clone()),
            );
        }
        builder.multipart(mixed)
    }
    .map_err(|e| ApiError::internal(format!("Message build failed: {}", e)))?;

    Ok((message, message_id))
}

/// Maps raw transport error text to a coarse kind. Substring matching is
/// brittle but mirrors what upstream servers actually emit; keep every
/// pattern in this one function.
pub fn classify_smtp_error(raw: &str) -> ApiError {
    let kind = if raw.contains("Daily user sending limit exceeded") {
        ErrorKind::DailyLimit
    } else if raw.contains("The recipient address") {
        ErrorKind::InvalidRecipient
    } else if raw.contains("Please log in with your web browser and then try again") {
        ErrorKind::AuthBrowserInteractionRequired
    } else if raw.contains("Syntax error, cannot decode response") {
        ErrorKind::SmtpSyntax
    } else {
        ErrorKind::SmtpError
    };
    ApiError::new(kind, raw.to_string())
}
