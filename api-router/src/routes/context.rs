use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Assembled context over all included items, bounded by the configured
/// character budget.
pub async fn get_context(State(state): State<ApiState>) -> impl IntoResponse {
    let context = state.repository.assemble_context().await;
    Json(json!({ "context": context }))
}
