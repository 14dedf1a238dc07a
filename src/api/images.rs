//! `/generate-image` handler: validation, idempotent replay, dispatch to
//! the image service, base64 or binary response shaping.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use crate::error::{ApiError, Result};
use crate::gemini::GenerateParams;
use crate::idempotency::{derive_fingerprint, Outcome};
use crate::models::GenerateImageRequest;
use crate::state::AppState;

const MIN_PROMPT_CHARS: usize = 3;
const MAX_PROMPT_CHARS: usize = 5000;
const MAX_STYLE_CHARS: usize = 100;
const MAX_N: u32 = 10;
const MAX_CLIENT_REQUEST_ID_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReturnMode {
    Base64,
    Binary,
}

/// POST /generate-image
pub async fn generate_image(
    State(state): State<AppState>,
    payload: std::result::Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload
        .map_err(|rejection| ApiError::validation(format!("Invalid body: {}", rejection.body_text())))?;

    let return_mode = validate_request(&request)?;

    let fingerprint = request
        .client_request_id
        .clone()
        .unwrap_or_else(|| derive_fingerprint(&fingerprint_fields(&request)));

    if let Some(entry) = state.idempotency.get(&fingerprint) {
        if entry.status == Outcome::Success {
            tracing::info!(key = %fingerprint, "Idempotent replay prevented, returning cached response");
            return respond(entry.response, return_mode);
        }
    }

    let params = GenerateParams {
        prompt: request.prompt.clone(),
        width: request.width,
        height: request.height,
        style: request.style.clone(),
        n: request.n,
    };

    match state.images.generate(&params).await {
        Ok(result) => {
            let envelope = json!({
                "success": true,
                "message": "Generated",
                "info": serde_json::to_value(&result)?,
            });
            state
                .idempotency
                .set(&fingerprint, Outcome::Success, envelope.clone());
            respond(envelope, return_mode)
        }
        Err(err) => {
            state
                .idempotency
                .set(&fingerprint, Outcome::Error, err.envelope());
            Err(err)
        }
    }
}

fn validate_request(request: &GenerateImageRequest) -> Result<ReturnMode> {
    let prompt_chars = request.prompt.chars().count();
    if prompt_chars < MIN_PROMPT_CHARS || prompt_chars > MAX_PROMPT_CHARS {
        return Err(ApiError::validation(format!(
            "prompt must be between {} and {} characters",
            MIN_PROMPT_CHARS, MAX_PROMPT_CHARS
        )));
    }
    if let Some(style) = &request.style {
        if style.chars().count() > MAX_STYLE_CHARS {
            return Err(ApiError::validation("style is too long"));
        }
    }
    if request.n < 1 || request.n > MAX_N {
        return Err(ApiError::validation(format!("n must be between 1 and {}", MAX_N)));
    }
    if request.width == Some(0) || request.height == Some(0) {
        return Err(ApiError::validation("width and height must be positive"));
    }
    if let Some(id) = &request.client_request_id {
        if id.chars().count() > MAX_CLIENT_REQUEST_ID_CHARS {
            return Err(ApiError::validation("client_request_id is too long"));
        }
    }
    let mode = match request.return_mode.as_deref() {
        None | Some("base64") => ReturnMode::Base64,
        Some("binary") => ReturnMode::Binary,
        Some(other) => {
            return Err(ApiError::validation(format!(
                "unsupported return mode: {}",
                other
            )))
        }
    };
    // checked before any key is consumed or provider call made
    if mode == ReturnMode::Binary && request.n != 1 {
        return Err(ApiError::validation("binary return only supported with n=1"));
    }
    Ok(mode)
}

/// Significant fields only; `client_request_id` replaces the derived hash
/// when present and is therefore excluded here.
fn fingerprint_fields(request: &GenerateImageRequest) -> Value {
    json!({
        "prompt": request.prompt,
        "width": request.width,
        "height": request.height,
        "style": request.style.as_deref().unwrap_or(""),
        "n": request.n,
        "return": request.return_mode.as_deref().unwrap_or("base64"),
    })
}

fn respond(envelope: Value, mode: ReturnMode) -> Result<Response> {
    match mode {
        ReturnMode::Base64 => Ok(Json(envelope).into_response()),
        ReturnMode::Binary => binary_response(&envelope),
    }
}

/// Raw image body with content headers; only reachable with exactly one
/// generated image.
fn binary_response(envelope: &Value) -> Result<Response> {
    let image = envelope["info"]["images"]
        .get(0)
        .ok_or_else(|| ApiError::internal("No image generated"))?;
    let data = image["data_base64"]
        .as_str()
        .ok_or_else(|| ApiError::internal("Image data unavailable for binary return"))?;
    let bytes = BASE64
        .decode(data.as_bytes())
        .map_err(|e| ApiError::internal(format!("Image payload decode failed: {}", e)))?;
    let mime = image["mime"].as_str().unwrap_or("application/octet-stream");
    let id = image["id"].as_str().unwrap_or("image");

    let mut response = bytes.clone().into_response();
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        mime.parse()
            .map_err(|_| ApiError::internal("Invalid content type"))?,
    );
    headers.insert(
        CONTENT_LENGTH,
        bytes
            .len()
            .to_string()
            .parse()
            .map_err(|_| ApiError::internal("Invalid content length"))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        format!("inline; filename=\"{}.{}\"", id, mime_to_ext(mime))
            .parse()
            .map_err(|_| ApiError::internal("Invalid content disposition"))?,
    );
    Ok(response)
}

fn mime_to_ext(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn request() -> GenerateImageRequest {
        GenerateImageRequest {
            prompt: "a cat".to_string(),
            width: None,
            height: None,
            style: None,
            n: 1,
            return_mode: None,
            client_request_id: None,
        }
    }

    #[test]
    fn binary_with_multiple_images_is_a_validation_error() {
        let mut req = request();
        req.return_mode = Some("binary".to_string());
        req.n = 2;
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "binary return only supported with n=1");
    }

    #[test]
    fn binary_with_one_image_is_accepted() {
        let mut req = request();
        req.return_mode = Some("binary".to_string());
        assert_eq!(validate_request(&req).unwrap(), ReturnMode::Binary);
    }

    #[test]
    fn prompt_length_bounds() {
        let mut req = request();
        req.prompt = "ab".to_string();
        assert!(validate_request(&req).is_err());
        req.prompt = "x".repeat(5001);
        assert!(validate_request(&req).is_err());
        req.prompt = "abc".to_string();
        assert!(validate_request(&req).is_ok());
    }

    #[test]
    fn unsupported_return_mode_is_rejected() {
        let mut req = request();
        req.return_mode = Some("url".to_string());
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn overlong_client_request_id_is_rejected() {
        let mut req = request();
        req.client_request_id = Some("x".repeat(101));
        assert!(validate_request(&req).is_err());
        req.client_request_id = Some("x".repeat(100));
        assert!(validate_request(&req).is_ok());
    }

    #[test]
    fn n_out_of_range_is_rejected() {
        let mut req = request();
        req.n = 0;
        assert!(validate_request(&req).is_err());
        req.n = 11;
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn fingerprint_excludes_client_request_id() {
        let mut req = request();
        let a = derive_fingerprint(&fingerprint_fields(&req));
        req.client_request_id = Some("req-1".to_string());
        let b = derive_fingerprint(&fingerprint_fields(&req));
        assert_eq!(a, b);

        req.prompt = "a dog".to_string();
        let c = derive_fingerprint(&fingerprint_fields(&req));
        assert_ne!(a, c);
    }

    #[test]
    fn binary_response_sets_content_headers() {
        let envelope = json!({
            "success": true,
            "info": { "images": [{
                "id": "img-1",
                "mime": "image/png",
                "data_base64": BASE64.encode([1u8, 2, 3]),
                "size_bytes": 3,
            }]}
        });
        let response = binary_response(&envelope).unwrap();
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "image/png");
        assert_eq!(headers[CONTENT_LENGTH], "3");
        assert_eq!(
            headers[CONTENT_DISPOSITION],
            "inline; filename=\"img-1.png\""
        );
    }
}
