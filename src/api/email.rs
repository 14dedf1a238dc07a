//! `/send-email` and `/send-email-batch` handlers: validation,
//! fingerprinting, idempotent replay, dispatch.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use lettre::message::Mailbox;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ApiError, ErrorKind, Result};
use crate::idempotency::{derive_fingerprint, Outcome};
use crate::mail::{Attachment, OutgoingEmail, SmtpCredentials};
use crate::models::{AttachmentPayload, NameList, SendEmailBatchRequest, SendEmailRequest};
use crate::state::AppState;

const MAX_SUBJECT_CHARS: usize = 255;
const MAX_BODY_CHARS: usize = 200_000;
const MAX_ATTACHMENTS: usize = 5;
const MAX_ATTACHMENT_BYTES: usize = 1_677_721; // ~1.6 MB decoded
const MAX_TOTAL_ATTACHMENT_BYTES: usize = 6 * 1024 * 1024;

/// POST /send-email
pub async fn send_email(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendEmailRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload
        .map_err(|rejection| ApiError::validation(format!("Invalid body: {}", rejection.body_text())))?;

    validate_common_fields(
        request.subject.as_deref(),
        request.body.as_deref(),
        &request.smtp_user,
        request.smtp_port,
    )?;
    if let Some(name) = &request.dear_name {
        if name.chars().count() > MAX_SUBJECT_CHARS {
            return Err(ApiError::validation("dear_name is too long"));
        }
    }
    if let Some(key) = &request.idempotency_key {
        Uuid::parse_str(key)
            .map_err(|_| ApiError::validation("idempotency_key must be a UUID"))?;
    }
    if let Some(reply_to) = &request.reply_to {
        if reply_to.parse::<Mailbox>().is_err() {
            return Err(ApiError::validation("reply_to must be a valid email address"));
        }
    }
    let smtp_pass = clean_smtp_pass(&request.smtp_pass)?;
    let recipients = split_recipients(&request.to_email)?;
    let attachments = decode_attachments(request.attachments.as_deref().unwrap_or(&[]))?;

    let fingerprint = request
        .idempotency_key
        .clone()
        .unwrap_or_else(|| derive_fingerprint(&fingerprint_fields(&request)));

    if let Some(entry) = state.idempotency.get(&fingerprint) {
        if entry.status == Outcome::Success {
            tracing::info!(key = %fingerprint, "Idempotent replay prevented, returning cached response");
            return Ok(Json(entry.response));
        }
    }

    let body = decorate_body(request.body.as_deref(), request.dear_name.as_deref());
    let creds = SmtpCredentials {
        user: request.smtp_user.clone(),
        pass: smtp_pass,
        server: request.smtp_server.clone(),
        port: request.smtp_port,
    };
    let email = OutgoingEmail {
        to: recipients,
        subject: request.subject.clone(),
        body,
        reply_to: request.reply_to.clone(),
        cc: split_list(request.cc.as_deref().unwrap_or_default()),
        bcc: split_list(request.bcc.as_deref().unwrap_or_default()),
        attachments,
    };

    match state.mailer.send(&creds, &email).await {
        Ok(message_id) => {
            let response = json!({
                "success": true,
                "message": "Email sent",
                "subject": request.subject.as_deref().unwrap_or(""),
                "assigned_account_email": request.smtp_user,
                "sent_time": Utc::now().to_rfc3339(),
                "idempotency_key": fingerprint,
                "message_id": message_id,
            });
            state
                .idempotency
                .set(&fingerprint, Outcome::Success, response.clone());
            Ok(Json(response))
        }
        Err(err) => {
            // the store never records pre-dispatch rejections
            if err.kind != ErrorKind::Validation {
                state
                    .idempotency
                    .set(&fingerprint, Outcome::Error, err.envelope());
            }
            Err(err)
        }
    }
}

/// POST /send-email-batch
pub async fn send_email_batch(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendEmailBatchRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload
        .map_err(|rejection| ApiError::validation(format!("Invalid body: {}", rejection.body_text())))?;

    if request.smtp_user.parse::<Mailbox>().is_err() {
        return Err(ApiError::validation("smtp_user must be a valid email address"));
    }
    if request.smtp_port == 0 {
        return Err(ApiError::validation("smtp_port must be positive"));
    }
    let smtp_pass = clean_smtp_pass(&request.smtp_pass)?;
    let default_attachments = decode_attachments(request.attachments.as_deref().unwrap_or(&[]))?;

    let items = resolve_batch_items(&request, &default_attachments)?;

    let creds = SmtpCredentials {
        user: request.smtp_user.clone(),
        pass: smtp_pass,
        server: request.smtp_server.clone(),
        port: request.smtp_port,
    };
    let summary = state.mailer.send_batch(&creds, &items).await;
    Ok(Json(serde_json::to_value(summary)?))
}

fn validate_common_fields(
    subject: Option<&str>,
    body: Option<&str>,
    smtp_user: &str,
    smtp_port: u16,
) -> Result<()> {
    if subject.map(|s| s.chars().count() > MAX_SUBJECT_CHARS) == Some(true) {
        return Err(ApiError::validation("subject is too long"));
    }
    if body.map(|b| b.chars().count() > MAX_BODY_CHARS) == Some(true) {
        return Err(ApiError::validation("body is too long"));
    }
    // full mailbox parse so a malformed sender cannot get past the
    // pre-dispatch checks and fail later inside message assembly
    if smtp_user.parse::<Mailbox>().is_err() {
        return Err(ApiError::validation("smtp_user must be a valid email address"));
    }
    if smtp_port == 0 {
        return Err(ApiError::validation("smtp_port must be positive"));
    }
    Ok(())
}

/// SMTP app passwords are often pasted with spaces; strip all whitespace.
fn clean_smtp_pass(raw: &str) -> Result<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(ApiError::validation("smtp_pass is required"));
    }
    Ok(cleaned)
}

/// Splits the strict comma-separated recipient list. No trimming: an
/// address carrying whitespace is rejected outright, before any SMTP
/// connection is opened.
fn split_recipients(raw: &str) -> Result<Vec<String>> {
    let recipients: Vec<String> = raw
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if recipients.is_empty() {
        return Err(ApiError::invalid_recipient("The recipient address is empty"));
    }
    if recipients
        .iter()
        .any(|r| r.chars().any(char::is_whitespace))
    {
        return Err(ApiError::invalid_recipient(
            "The recipient address contains whitespace",
        ));
    }
    Ok(recipients)
}

/// Lenient split used for cc/bcc and bulk recipient lists.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn decode_attachments(payloads: &[AttachmentPayload]) -> Result<Vec<Attachment>> {
    if payloads.len() > MAX_ATTACHMENTS {
        return Err(ApiError::validation(format!(
            "At most {} attachments allowed",
            MAX_ATTACHMENTS
        )));
    }
    let mut attachments = Vec::with_capacity(payloads.len());
    let mut total = 0usize;
    for payload in payloads {
        if !payload.filename.to_ascii_lowercase().ends_with(".pdf") {
            return Err(ApiError::validation(format!(
                "Attachment {}: only .pdf allowed",
                payload.filename
            )));
        }
        let b64 = strip_data_url_prefix(payload.content_base64.trim());
        let content = BASE64.decode(b64.as_bytes()).map_err(|_| {
            ApiError::validation(format!("Attachment {} base64 invalid", payload.filename))
        })?;
        if content.len() > MAX_ATTACHMENT_BYTES {
            return Err(ApiError::payload_too_large(format!(
                "Attachment {} too large (> 1.6MB)",
                payload.filename
            )));
        }
        total += content.len();
        attachments.push(Attachment {
            filename: payload.filename.clone(),
            content,
        });
    }
    if total > MAX_TOTAL_ATTACHMENT_BYTES {
        return Err(ApiError::payload_too_large(
            "Total attachments exceed 6.0MB",
        ));
    }
    Ok(attachments)
}

fn strip_data_url_prefix(b64: &str) -> &str {
    let lower = b64.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("data:application/pdf;base64,") {
        // slice the original to preserve case of the payload
        &b64[b64.len() - rest.len()..]
    } else {
        b64
    }
}

/// Semantically significant fields only; the optional idempotency key is
/// deliberately excluded (it replaces the derived hash when present).
fn fingerprint_fields(request: &SendEmailRequest) -> Value {
    json!({
        "to_email": request.to_email,
        "subject": request.subject.as_deref().unwrap_or(""),
        "body": request.body.as_deref().unwrap_or(""),
        "smtp_user": request.smtp_user,
        "smtp_server": request.smtp_server,
        "smtp_port": request.smtp_port,
        "reply_to": request.reply_to.as_deref().unwrap_or(""),
        "cc": request.cc.as_deref().unwrap_or(""),
        "bcc": request.bcc.as_deref().unwrap_or(""),
    })
}

fn decorate_body(body: Option<&str>, dear_name: Option<&str>) -> Option<String> {
    match dear_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => Some(format!(
            "<p>Dear Sir {}</p>\n{}",
            escape_html(name),
            body.unwrap_or_default()
        )),
        None => body.map(str::to_string),
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn resolve_batch_items(
    request: &SendEmailBatchRequest,
    default_attachments: &[Attachment],
) -> Result<Vec<OutgoingEmail>> {
    if let Some(items) = &request.items {
        if items.is_empty() {
            return Err(ApiError::validation("items must not be empty"));
        }
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let attachments = match &item.attachments {
                Some(payloads) => decode_attachments(payloads)?,
                None => default_attachments.to_vec(),
            };
            out.push(OutgoingEmail {
                // no trimming: a bad address surfaces as that item's
                // INVALID_RECIPIENT result, not a request-level error
                to: item
                    .to_email
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                subject: item.subject.clone().or_else(|| request.subject.clone()),
                body: decorate_body(
                    item.body.as_deref().or(request.body_template.as_deref()),
                    item.dear_name.as_deref(),
                ),
                reply_to: item.reply_to.clone(),
                cc: split_list(item.cc.as_deref().unwrap_or_default()),
                bcc: split_list(item.bcc.as_deref().unwrap_or_default()),
                attachments,
            });
        }
        return Ok(out);
    }

    // simplified bulk mode
    let Some(bulk) = &request.email_bulk else {
        return Err(ApiError::validation(
            "Either items or email_bulk is required",
        ));
    };
    let recipients = split_list(bulk);
    if recipients.is_empty() {
        return Err(ApiError::invalid_recipient("The recipient address is empty"));
    }
    let names = match &request.sender_names {
        Some(list) => list.clone().into_names(),
        None => {
            return Err(ApiError::validation(
                "sender_names is required with email_bulk",
            ))
        }
    };
    if names.len() != recipients.len() {
        return Err(ApiError::validation(
            "sender_names must align with email_bulk",
        ));
    }
    let template = request.body_template.as_deref().unwrap_or_default();
    Ok(recipients
        .into_iter()
        .zip(names)
        .map(|(to, name)| OutgoingEmail {
            to: vec![to],
            subject: request.subject.clone(),
            body: Some(template.replace("{{name}}", &escape_html(&name))),
            attachments: default_attachments.to_vec(),
            ..Default::default()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn recipient_with_internal_space_is_rejected() {
        // "a@x.com, b@x.com" splits into ["a@x.com", " b@x.com"]
        let err = split_recipients("a@x.com, b@x.com").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRecipient);
    }

    #[test]
    fn tight_comma_list_is_accepted() {
        let recipients = split_recipients("a@x.com,b@x.com").unwrap();
        assert_eq!(recipients, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn empty_recipient_list_is_rejected() {
        let err = split_recipients("").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRecipient);
        assert_eq!(err.message, "The recipient address is empty");
    }

    #[test]
    fn truncated_sender_address_is_rejected_up_front() {
        let err = validate_common_fields(None, None, "a@", 587).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(validate_common_fields(None, None, "sender@example.com", 587).is_ok());
    }

    #[test]
    fn smtp_pass_whitespace_is_stripped() {
        assert_eq!(clean_smtp_pass("abcd efgh ijkl").unwrap(), "abcdefghijkl");
        assert!(clean_smtp_pass("   ").is_err());
    }

    #[test]
    fn fingerprint_excludes_idempotency_key() {
        let mut request = send_request();
        let a = derive_fingerprint(&fingerprint_fields(&request));
        request.idempotency_key = Some("b6a7b810-9dad-11d1-80b4-00c04fd430c8".to_string());
        let b = derive_fingerprint(&fingerprint_fields(&request));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_recipients() {
        let mut request = send_request();
        let a = derive_fingerprint(&fingerprint_fields(&request));
        request.to_email = "other@x.com".to_string();
        let b = derive_fingerprint(&fingerprint_fields(&request));
        assert_ne!(a, b);
    }

    #[test]
    fn dear_name_is_escaped_and_prepended() {
        let body = decorate_body(Some("<p>hi</p>"), Some("<b>Smith</b>")).unwrap();
        assert_eq!(
            body,
            "<p>Dear Sir &lt;b&gt;Smith&lt;/b&gt;</p>\n<p>hi</p>"
        );
        assert_eq!(decorate_body(Some("x"), None).as_deref(), Some("x"));
    }

    #[test]
    fn attachment_rules() {
        let pdf = |filename: &str, bytes: usize| AttachmentPayload {
            filename: filename.to_string(),
            content_base64: BASE64.encode(vec![0u8; bytes]),
        };

        assert!(decode_attachments(&[pdf("a.pdf", 10)]).is_ok());
        assert_eq!(
            decode_attachments(&[pdf("a.txt", 10)]).unwrap_err().kind,
            ErrorKind::Validation
        );
        assert_eq!(
            decode_attachments(&[pdf("a.pdf", MAX_ATTACHMENT_BYTES + 1)])
                .unwrap_err()
                .kind,
            ErrorKind::PayloadTooLarge
        );
        let five_mb_each = vec![pdf("a.pdf", 1_600_000); 5];
        assert_eq!(
            decode_attachments(&five_mb_each).unwrap_err().kind,
            ErrorKind::PayloadTooLarge
        );
        let six = vec![pdf("a.pdf", 1); 6];
        assert_eq!(
            decode_attachments(&six).unwrap_err().kind,
            ErrorKind::Validation
        );
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        let payload = AttachmentPayload {
            filename: "a.pdf".to_string(),
            content_base64: format!("data:application/pdf;base64,{}", BASE64.encode(b"hello")),
        };
        let decoded = decode_attachments(&[payload]).unwrap();
        assert_eq!(decoded[0].content, b"hello");
    }

    #[test]
    fn bulk_mode_renders_template_per_recipient() {
        let request = SendEmailBatchRequest {
            smtp_user: "s@example.com".to_string(),
            smtp_pass: "pass".to_string(),
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            items: None,
            email_bulk: Some("a@x.com, b@x.com".to_string()),
            sender_names: Some(NameList::List(vec!["Alice".to_string(), "Bob".to_string()])),
            subject: Some("Hello".to_string()),
            body_template: Some("<p>Hi {{name}}</p>".to_string()),
            attachments: None,
        };
        let items = resolve_batch_items(&request, &[]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].to, vec!["a@x.com"]);
        assert_eq!(items[0].body.as_deref(), Some("<p>Hi Alice</p>"));
        assert_eq!(items[1].body.as_deref(), Some("<p>Hi Bob</p>"));
        assert_eq!(items[1].subject.as_deref(), Some("Hello"));
    }

    #[test]
    fn bulk_mode_accepts_comma_separated_names() {
        let request = SendEmailBatchRequest {
            smtp_user: "s@example.com".to_string(),
            smtp_pass: "pass".to_string(),
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            items: None,
            email_bulk: Some("a@x.com,b@x.com".to_string()),
            sender_names: Some(NameList::Csv("Alice, Bob".to_string())),
            subject: None,
            body_template: Some("Hi {{name}}".to_string()),
            attachments: None,
        };
        let items = resolve_batch_items(&request, &[]).unwrap();
        assert_eq!(items[0].body.as_deref(), Some("Hi Alice"));
        assert_eq!(items[1].body.as_deref(), Some("Hi Bob"));
    }

    #[test]
    fn batch_request_accepts_original_wire_form() {
        let request: SendEmailBatchRequest = serde_json::from_value(json!({
            "smtp_user": "s@example.com",
            "smtp_pass": "pass",
            "smtp_server": "smtp.example.com",
            "smtp_port": 587,
            "default_subject": "Shared",
            "default_body": "<p>Base</p>",
            "items": [
                { "to_email": "a@x.com", "dear_name": "Alice" }
            ],
        }))
        .unwrap();
        let items = resolve_batch_items(&request, &[]).unwrap();
        assert_eq!(items[0].to, vec!["a@x.com"]);
        assert_eq!(items[0].subject.as_deref(), Some("Shared"));
        assert_eq!(
            items[0].body.as_deref(),
            Some("<p>Dear Sir Alice</p>\n<p>Base</p>")
        );
    }

    #[test]
    fn bulk_mode_requires_aligned_names() {
        let request = SendEmailBatchRequest {
            smtp_user: "s@example.com".to_string(),
            smtp_pass: "pass".to_string(),
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            items: None,
            email_bulk: Some("a@x.com,b@x.com".to_string()),
            sender_names: Some(NameList::List(vec!["Alice".to_string()])),
            subject: None,
            body_template: None,
            attachments: None,
        };
        let err = resolve_batch_items(&request, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn explicit_items_inherit_defaults() {
        let request = SendEmailBatchRequest {
            smtp_user: "s@example.com".to_string(),
            smtp_pass: "pass".to_string(),
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            items: Some(vec![crate::models::BatchItemPayload {
                to_email: "a@x.com".to_string(),
                subject: None,
                body: None,
                dear_name: None,
                reply_to: None,
                cc: None,
                bcc: None,
                attachments: None,
            }]),
            email_bulk: None,
            sender_names: None,
            subject: Some("Shared subject".to_string()),
            body_template: Some("Shared body".to_string()),
            attachments: None,
        };
        let items = resolve_batch_items(&request, &[]).unwrap();
        assert_eq!(items[0].subject.as_deref(), Some("Shared subject"));
        assert_eq!(items[0].body.as_deref(), Some("Shared body"));
    }

    fn send_request() -> SendEmailRequest {
        SendEmailRequest {
            to_email: "a@x.com".to_string(),
            subject: Some("Hello".to_string()),
            body: Some("<p>hi</p>".to_string()),
            dear_name: None,
            smtp_user: "sender@example.com".to_string(),
            smtp_pass: "pass".to_string(),
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            idempotency_key: None,
            reply_to: None,
            cc: None,
            bcc: None,
            attachments: None,
        }
    }
}
