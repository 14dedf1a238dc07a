//! HTTP client for the image provider's `generateContent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::Config;

/// One image returned by the provider. `bytes` may be empty when the
/// provider answered without a usable inline payload.
#[derive(Debug, Clone)]
pub struct ProviderImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderFailure {
    /// Credential-related failures force an immediate key quarantine.
    pub fn is_severe(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

/// Seam between the generation service and the provider wire protocol.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(
        &self,
        api_key: &str,
        prompt: &str,
        n: u32,
    ) -> Result<Vec<ProviderImage>, ProviderFailure>;
}

pub struct GeminiClient {
    http: Client,
    api_base: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.gemini_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: config.gemini_model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        let model = self.model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

#[async_trait]
impl ImageProvider for GeminiClient {
    async fn generate(
        &self,
        api_key: &str,
        prompt: &str,
        n: u32,
    ) -> Result<Vec<ProviderImage>, ProviderFailure> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "candidateCount": n,
                "responseModalities": ["TEXT", "IMAGE"],
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderFailure {
                status: e.status().map(|s| s.as_u16()),
                message: format!("Gemini request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderFailure {
                status: Some(status.as_u16()),
                message: format!("Gemini returned {}: {}", status.as_u16(), text),
            });
        }

        let payload: Value = response.json().await.map_err(|e| ProviderFailure {
            status: None,
            message: format!("Gemini response decode failed: {}", e),
        })?;
        extract_inline_images(&payload)
    }
}

/// Pulls inline image payloads out of `candidates[].content.parts[]`,
/// tolerating both `inlineData` and `inline_data` spellings.
fn extract_inline_images(payload: &Value) -> Result<Vec<ProviderImage>, ProviderFailure> {
    let mut out = Vec::new();
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64.decode(data.as_bytes()).map_err(|e| ProviderFailure {
                status: None,
                message: format!("Gemini image base64 decode failed: {}", e),
            })?;
            let mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            out.push(ProviderImage { mime, bytes });
        }
    }

    Ok(out)
}
