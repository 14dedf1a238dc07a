pub mod email;
pub mod health;
pub mod images;
pub mod keys;

use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;

use crate::error::ApiError;
use crate::ratelimit::limit_requests;
use crate::security::require_api_key;
use crate::state::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    let mutating = Router::new()
        .route("/send-email", post(email::send_email))
        .route("/send-email-batch", post(email::send_email_batch))
        .route("/generate-image", post(images::generate_image))
        .layer(middleware::from_fn_with_state(state.clone(), limit_requests));

    let protected = Router::new()
        .merge(mutating)
        .route("/provider-keys", get(keys::list_provider_keys))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .merge(health::health_routes())
        .merge(protected)
        .layer(CatchPanicLayer::custom(panic_envelope))
        .with_state(state)
}

/// A panicking handler still answers with the uniform error envelope.
fn panic_envelope(panic: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(%detail, "Handler panicked");
    ApiError::internal("Internal server error").into_response()
}
