use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::storage::types::kb_item::UpdateKBItem;
use ingestion_pipeline::detector::{self, Route};
use ingestion_pipeline::ocr::OcrOutcome;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

/// Opens the preview for a stored item, replacing any preview already open.
/// Only items ingested with an embedded PDF payload qualify.
pub async fn open_preview(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(item) = state.repository.get_item(&id).await else {
        return Err(ApiError::NotFound(id));
    };
    if detector::detect(&item.name, &item.mime_type) != Route::Pdf {
        return Err(ApiError::ValidationError(format!(
            "Item {id} is not a PDF"
        )));
    }
    let Some(payload) = item.preview_payload.as_deref() else {
        return Err(ApiError::ValidationError(format!(
            "Item {id} carries no preview payload"
        )));
    };
    let pdf = STANDARD.decode(payload).map_err(|_| {
        ApiError::ValidationError(format!("Item {id} has a malformed preview payload"))
    })?;

    let preview = &state.preview;
    preview.renderer.close()?;
    preview.unbind();
    preview.renderer.open(Bytes::from(pdf)).await?;
    preview.bind(&id);

    info!(item_id = %id, "preview opened");
    Ok(Json(json!({
        "item_id": id,
        "state": preview.renderer.state().as_str(),
        "page_count": preview.renderer.page_count(),
        "current_page": preview.renderer.current_page(),
    })))
}

pub async fn preview_status(State(state): State<ApiState>) -> impl IntoResponse {
    let preview = &state.preview;
    Json(json!({
        "item_id": preview.current_item(),
        "state": preview.renderer.state().as_str(),
        "page_count": preview.renderer.page_count(),
        "current_page": preview.renderer.current_page(),
    }))
}

pub async fn close_preview(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    state.preview.renderer.close()?;
    state.preview.unbind();
    Ok((StatusCode::OK, Json(json!({ "status": "success" }))))
}

#[derive(Debug, Deserialize)]
pub struct RenderParams {
    pub zoom: Option<f32>,
}

/// Renders one page of the open preview as PNG, optionally at a new zoom
/// factor that sticks for subsequent renders.
pub async fn render_preview_page(
    State(state): State<ApiState>,
    Path(page): Path<u32>,
    Query(params): Query<RenderParams>,
) -> Result<impl IntoResponse, ApiError> {
    let renderer = &state.preview.renderer;
    if let Some(zoom) = params.zoom {
        renderer.update_zoom(zoom)?;
    }
    let png = renderer.render_page(page).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

/// Pulls the embedded text layer out of the whole previewed document and
/// writes the result back onto the item.
pub async fn extract_preview_text(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let id = bound_item(&state)?;
    let text = state.preview.renderer.extract_all_pages().await?;

    let update = if text.trim().is_empty() {
        UpdateKBItem {
            note: Some("Manual extraction found no embedded text".to_string()),
            ..UpdateKBItem::default()
        }
    } else {
        UpdateKBItem {
            text: Some(text),
            note: Some("Text replaced by manual extraction".to_string()),
            ..UpdateKBItem::default()
        }
    };
    let item = state.repository.update_item(&id, &update).await?;
    info!(item_id = %id, extracted = item.text.is_some(), "manual extraction finished");
    Ok(Json(item))
}

/// Runs the bounded recognition sweep over the previewed document and
/// writes the result back onto the item.
pub async fn ocr_preview_text(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let id = bound_item(&state)?;
    let outcome = state.preview.renderer.ocr_all_pages(None).await?;

    let update = match outcome {
        OcrOutcome::Recognized(text) => UpdateKBItem {
            text: Some(text),
            note: Some("Text replaced by manual recognition sweep".to_string()),
            ..UpdateKBItem::default()
        },
        OcrOutcome::NothingRecognized => UpdateKBItem {
            note: Some("Manual recognition sweep found no text".to_string()),
            ..UpdateKBItem::default()
        },
    };
    let item = state.repository.update_item(&id, &update).await?;
    info!(item_id = %id, "manual recognition sweep finished");
    Ok(Json(item))
}

fn bound_item(state: &ApiState) -> Result<String, ApiError> {
    state
        .preview
        .current_item()
        .ok_or_else(|| ApiError::ValidationError("No preview is open".to_string()))
}
