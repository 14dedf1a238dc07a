use serde::Deserialize;

/// Base64-encoded PDF attachment as submitted by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentPayload {
    pub filename: String,
    pub content_base64: String,
}

/// `POST /send-email` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SendEmailRequest {
    /// Comma-separated recipient list.
    pub to_email: String,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// When present, a greeting paragraph is prepended to the body.
    pub dear_name: Option<String>,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    /// Used verbatim as the idempotency fingerprint when present.
    pub idempotency_key: Option<String>,
    pub reply_to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub attachments: Option<Vec<AttachmentPayload>>,
}

/// One explicit item of `POST /send-email-batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItemPayload {
    /// Comma-separated recipient list.
    #[serde(alias = "to")]
    pub to_email: String,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// When present, a greeting paragraph is prepended to this item's body.
    pub dear_name: Option<String>,
    pub reply_to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub attachments: Option<Vec<AttachmentPayload>>,
}

/// Bulk-mode names: a comma-separated string on the wire, an explicit
/// array is accepted too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    List(Vec<String>),
    Csv(String),
}

impl NameList {
    pub fn into_names(self) -> Vec<String> {
        match self {
            NameList::List(names) => names,
            NameList::Csv(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// `POST /send-email-batch` request body: either explicit `items`, or the
/// simplified bulk mode (`email_bulk` + aligned `sender_names` + shared
/// subject/body template). The shared defaults also answer to their
/// `default_*` names.
#[derive(Debug, Clone, Deserialize)]
pub struct SendEmailBatchRequest {
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub items: Option<Vec<BatchItemPayload>>,
    pub email_bulk: Option<String>,
    pub sender_names: Option<NameList>,
    #[serde(alias = "default_subject")]
    pub subject: Option<String>,
    #[serde(alias = "default_body")]
    pub body_template: Option<String>,
    #[serde(alias = "default_attachments")]
    pub attachments: Option<Vec<AttachmentPayload>>,
}
