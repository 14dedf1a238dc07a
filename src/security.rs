//! Shared-secret authentication (constant-time compare).

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

/// Constant-time equality; length mismatch still short-circuits, which is
/// acceptable for a random shared secret.
pub fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Requires the shared secret via `x-api-key` header or `api_key` query
/// parameter on every route this layer wraps.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            request
                .uri()
                .query()
                .and_then(|q| api_key_from_query(q))
        });

    match presented {
        Some(key) if ct_eq(&key, &state.config.api_key) => next.run(request).await,
        _ => ApiError::unauthorized().into_response(),
    }
}

fn api_key_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let value = pair.strip_prefix("api_key=")?;
        // form semantics: '+' is a space, then percent-decode
        urlencoding::decode(&value.replace('+', " "))
            .ok()
            .map(|v| v.into_owned())
    })
}
