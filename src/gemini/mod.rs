//! Image generation: key rotation, provider call, placeholder fallback.

pub mod client;
pub mod keys;
pub mod placeholder;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ApiError, Result};
use client::ImageProvider;
use keys::KeyManager;

pub use client::{GeminiClient, ProviderFailure, ProviderImage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub mime: String,
    pub data_base64: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateImageResult {
    pub request_id: String,
    pub model: String,
    pub images: Vec<GeneratedImage>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateParams {
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub style: Option<String>,
    pub n: u32,
}

pub struct ImageService {
    keys: Arc<KeyManager>,
    provider: Arc<dyn ImageProvider>,
    model: String,
    max_images: u32,
}

impl ImageService {
    pub fn new(config: &Config, keys: Arc<KeyManager>, provider: Arc<dyn ImageProvider>) -> Self {
        Self {
            keys,
            provider,
            model: config.gemini_model.clone(),
            max_images: config.gemini_max_images,
        }
    }

    /// Runs one generation request end to end: pick a key, call the
    /// provider, backfill placeholders so the result always carries the
    /// requested image count, and report the outcome to the key manager.
    pub async fn generate(&self, params: &GenerateParams) -> Result<GenerateImageResult> {
        let n = params.n.clamp(1, self.max_images);
        let key = self.keys.pick_key().ok_or_else(ApiError::keys_exhausted)?;
        let prompt = build_prompt(params);

        match self.provider.generate(&key, &prompt, n).await {
            Ok(provided) => {
                // The provider responded; placeholder backfill is still a
                // success from the key's point of view.
                self.keys.report_success(&key);
                let images = self.assemble(params, n, provided)?;
                Ok(GenerateImageResult {
                    request_id: Uuid::new_v4().to_string(),
                    model: self.model.clone(),
                    images,
                })
            }
            Err(failure) => {
                let severe = failure.is_severe();
                self.keys.report_error(&key, severe);
                tracing::error!(error = %failure, severe, "Gemini call failed");
                Err(ApiError::gemini(failure.message))
            }
        }
    }

    fn assemble(
        &self,
        params: &GenerateParams,
        n: u32,
        provided: Vec<ProviderImage>,
    ) -> Result<Vec<GeneratedImage>> {
        let mut provided = provided.into_iter();
        let mut images = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let image = match provided.next().filter(|img| !img.bytes.is_empty()) {
                Some(img) => GeneratedImage {
                    id: Uuid::new_v4().to_string(),
                    mime: img.mime,
                    size_bytes: img.bytes.len(),
                    data_base64: BASE64.encode(&img.bytes),
                },
                None => {
                    let bytes = placeholder::render(
                        &params.prompt,
                        params.width.unwrap_or(placeholder::DEFAULT_WIDTH),
                        params.height.unwrap_or(placeholder::DEFAULT_HEIGHT),
                    )?;
                    GeneratedImage {
                        id: Uuid::new_v4().to_string(),
                        mime: "image/png".to_string(),
                        size_bytes: bytes.len(),
                        data_base64: BASE64.encode(&bytes),
                    }
                }
            };
            images.push(image);
        }
        Ok(images)
    }
}

/// Normalizes the user prompt with style, dimensions and fixed quality
/// constraints before it reaches the provider.
fn build_prompt(params: &GenerateParams) -> String {
    let mut sections = vec![format!("Detailed image description: {}", params.prompt.trim())];
    if let Some(style) = params.style.as_deref().filter(|s| !s.trim().is_empty()) {
        sections.push(format!("Style: {}", style.trim()));
    }
    if let (Some(w), Some(h)) = (params.width, params.height) {
        sections.push(format!("Requested dimensions: {}x{} px", w, h));
    }
    sections.push(
        "Quality constraints: clear composition with the main subject prominent; \
         harmonious lighting and colors; no artifacts; no text or branding unless \
         requested; stay faithful to the description."
            .to_string(),
    );
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<Vec<std::result::Result<Vec<ProviderImage>, ProviderFailure>>>,
        calls: Mutex<Vec<u32>>,
    }

    impl ScriptedProvider {
        fn new(
            responses: Vec<std::result::Result<Vec<ProviderImage>, ProviderFailure>>,
        ) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageProvider for ScriptedProvider {
        async fn generate(
            &self,
            _api_key: &str,
            _prompt: &str,
            n: u32,
        ) -> std::result::Result<Vec<ProviderImage>, ProviderFailure> {
            self.calls.lock().unwrap().push(n);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn service(
        keys: Vec<String>,
        provider: Arc<ScriptedProvider>,
    ) -> (ImageService, Arc<KeyManager>) {
        let manager = Arc::new(KeyManager::new(keys));
        let config = Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            log_level: "info".to_string(),
            api_key: "test-api-key".to_string(),
            gemini_api_keys: vec![],
            gemini_model: "test-model".to_string(),
            gemini_timeout_ms: 1000,
            gemini_max_images: 4,
            rate_limit_per_minute: 50,
        };
        (
            ImageService::new(&config, manager.clone(), provider),
            manager,
        )
    }

    fn png(bytes: &[u8]) -> ProviderImage {
        ProviderImage {
            mime: "image/png".to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn returns_requested_count_with_placeholder_backfill() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec![png(&[9, 9, 9])])]));
        let (svc, _) = service(vec!["key-aaaa-0001".into()], provider);

        let result = svc
            .generate(&GenerateParams {
                prompt: "a cat".to_string(),
                n: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.images.len(), 3);
        assert_eq!(result.model, "test-model");
        // first image came from the provider, the rest are placeholders
        assert_eq!(result.images[0].data_base64, BASE64.encode([9u8, 9, 9]));
        assert!(result.images[1].size_bytes > 0);
        assert_eq!(result.images[1].mime, "image/png");
    }

    #[tokio::test]
    async fn count_is_clamped_to_configured_max() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec![])]));
        let (svc, _) = service(vec!["key-aaaa-0001".into()], provider.clone());

        let result = svc
            .generate(&GenerateParams {
                prompt: "a cat".to_string(),
                n: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.images.len(), 4);
        assert_eq!(provider.calls.lock().unwrap().as_slice(), &[4]);
    }

    #[tokio::test]
    async fn exhausted_keys_surface_without_a_provider_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (svc, manager) = service(vec!["key-aaaa-0001".into()], provider.clone());
        manager.report_error("key-aaaa-0001", true);

        let err = svc
            .generate(&GenerateParams {
                prompt: "a cat".to_string(),
                n: 1,
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::ProviderKeysExhausted);
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_reports_error_and_maps_kind() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderFailure {
            status: Some(401),
            message: "unauthorized".to_string(),
        })]));
        let (svc, manager) = service(vec!["key-aaaa-0001".into()], provider);

        let err = svc
            .generate(&GenerateParams {
                prompt: "a cat".to_string(),
                n: 1,
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::GeminiError);
        // 401 is severe, the single key went straight into cooldown
        assert!(manager.pick_key().is_none());
    }

    #[tokio::test]
    async fn fallback_only_result_still_reports_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec![])]));
        let (svc, manager) = service(vec!["key-aaaa-0001".into()], provider);

        let result = svc
            .generate(&GenerateParams {
                prompt: "a cat".to_string(),
                n: 2,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.images.len(), 2);
        let states = manager.list_key_states();
        assert!(states[0].healthy);
        assert_eq!(states[0].consecutive_errors, 0);
    }

    #[test]
    fn prompt_includes_style_and_dimensions() {
        let prompt = build_prompt(&GenerateParams {
            prompt: " a cat ".to_string(),
            width: Some(640),
            height: Some(480),
            style: Some("watercolor".to_string()),
            n: 1,
        });
        assert!(prompt.contains("Detailed image description: a cat"));
        assert!(prompt.contains("Style: watercolor"));
        assert!(prompt.contains("640x480 px"));
    }
}
