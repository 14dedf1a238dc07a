use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// Closed set of machine-readable failure kinds carried in every error
/// envelope as the `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION")]
    Validation,
    #[serde(rename = "INVALID_RECIPIENT")]
    InvalidRecipient,
    #[serde(rename = "AUTH")]
    Auth,
    #[serde(rename = "RATE_LIMIT")]
    RateLimit,
    #[serde(rename = "DAILY_LIMIT")]
    DailyLimit,
    #[serde(rename = "AUTH_BROWSER_INTERACTION_REQUIRED")]
    AuthBrowserInteractionRequired,
    #[serde(rename = "SMTP_SYNTAX")]
    SmtpSyntax,
    #[serde(rename = "SMTP_ERROR")]
    SmtpError,
    #[serde(rename = "PROVIDER_KEYS_EXHAUSTED")]
    ProviderKeysExhausted,
    #[serde(rename = "GEMINI_ERROR")]
    GeminiError,
    #[serde(rename = "PAYLOAD_TOO_LARGE")]
    PayloadTooLarge,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::InvalidRecipient => "INVALID_RECIPIENT",
            ErrorKind::Auth => "AUTH",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::DailyLimit => "DAILY_LIMIT",
            ErrorKind::AuthBrowserInteractionRequired => "AUTH_BROWSER_INTERACTION_REQUIRED",
            ErrorKind::SmtpSyntax => "SMTP_SYNTAX",
            ErrorKind::SmtpError => "SMTP_ERROR",
            ErrorKind::ProviderKeysExhausted => "PROVIDER_KEYS_EXHAUSTED",
            ErrorKind::GeminiError => "GEMINI_ERROR",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::InvalidRecipient => StatusCode::BAD_REQUEST,
            ErrorKind::Auth | ErrorKind::AuthBrowserInteractionRequired => {
                StatusCode::UNAUTHORIZED
            }
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RateLimit | ErrorKind::DailyLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::SmtpSyntax | ErrorKind::GeminiError => StatusCode::BAD_GATEWAY,
            ErrorKind::ProviderKeysExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::SmtpError | ErrorKind::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn invalid_recipient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRecipient, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Auth, "Unauthorized")
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimit, "Too many requests")
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, message)
    }

    pub fn keys_exhausted() -> Self {
        Self::new(
            ErrorKind::ProviderKeysExhausted,
            "All provider keys unavailable",
        )
    }

    pub fn gemini(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeminiError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// The uniform failure envelope, also what the idempotency store
    /// records for non-validation failures.
    pub fn envelope(&self) -> serde_json::Value {
        json!({
            "success": false,
            "error": {
                "message": self.message,
                "type": self.kind.as_str(),
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        (status, Json(self.envelope())).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::internal(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
