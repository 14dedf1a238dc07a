use serde::Deserialize;

/// `POST /generate-image` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub style: Option<String>,
    #[serde(default = "default_n")]
    pub n: u32,
    /// `base64` (default) or `binary`; binary requires exactly one image.
    #[serde(rename = "return")]
    pub return_mode: Option<String>,
    /// Used verbatim as the idempotency fingerprint when present.
    pub client_request_id: Option<String>,
}

fn default_n() -> u32 {
    1
}
