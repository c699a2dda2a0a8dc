use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: returns 200 if the database tier answers, else 503.
/// Reports the live item count so operators can spot a failed startup load.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    match state.db.client.query("RETURN true").await {
        Ok(_) => {
            let items = state.repository.get_items().await.len();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "checks": { "db": "ok" },
                    "items": items
                })),
            )
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "fail" },
                "reason": e.to_string()
            })),
        ),
    }
}
