use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    context::get_context,
    items::{delete_item, get_item, ingest_items, list_items, reextract_item, update_item},
    liveness::live,
    preview::{
        close_preview, extract_preview_text, ocr_preview_text, open_preview, preview_status,
        render_preview_page,
    },
    readiness::ready,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let items = Router::new()
        .route("/items", get(list_items).post(ingest_items))
        .route(
            "/items/{id}",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .route("/items/{id}/reextract", post(reextract_item))
        .route("/items/{id}/preview", post(open_preview))
        .route("/preview", get(preview_status).delete(close_preview))
        .route("/preview/pages/{page}", get(render_preview_page))
        .route("/preview/extract", post(extract_preview_text))
        .route("/preview/ocr", post(ocr_preview_text))
        .route("/context", get(get_context))
        .layer(DefaultBodyLimit::max(
            app_state.config.ingest_max_body_bytes,
        ));

    probes.merge(items)
}
