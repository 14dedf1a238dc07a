use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /provider-keys - masked key health snapshot
pub async fn list_provider_keys(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "keys": state.keys.list_key_states(),
    }))
}
