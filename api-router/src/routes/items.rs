use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::storage::types::{kb_item::UpdateKBItem, upload::RawUpload};
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct IngestParams {
    #[form_data(limit = "unlimited")]
    #[form_data(default)]
    pub files: Vec<FieldData<Bytes>>,
}

fn upload_from_field(field: FieldData<Bytes>) -> RawUpload {
    let name = field
        .metadata
        .file_name
        .unwrap_or_else(|| "unnamed".to_string());
    let mime_type = field
        .metadata
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    RawUpload::new(&name, &mime_type, field.contents)
}

/// Ingests a batch of uploads. One item per upload comes back in upload
/// order; per-file extraction failures degrade to a `note` on the item
/// rather than failing the batch.
pub async fn ingest_items(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<IngestParams>,
) -> Result<impl IntoResponse, ApiError> {
    if input.files.is_empty() {
        return Err(ApiError::ValidationError(
            "At least one file part is required".to_string(),
        ));
    }

    info!(file_count = input.files.len(), "received ingestion request");

    let uploads: Vec<RawUpload> = input.files.into_iter().map(upload_from_field).collect();
    let items = state.repository.save_items(uploads).await?;

    Ok((StatusCode::CREATED, Json(items)))
}

pub async fn list_items(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.repository.get_items().await)
}

pub async fn get_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.repository.get_item(&id).await {
        Some(item) => Ok(Json(item)),
        None => Err(ApiError::NotFound(id)),
    }
}

pub async fn update_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<UpdateKBItem>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.repository.update_item(&id, &update).await?;
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.repository.delete_item(&id).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "success" }))))
}

#[derive(Debug, TryFromMultipart)]
pub struct ReextractParams {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<Bytes>,
}

/// Re-runs extraction for an existing item against freshly supplied bytes.
pub async fn reextract_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    TypedMultipart(input): TypedMultipart<ReextractParams>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.repository.reextract(&id, input.file.contents).await?;
    Ok(Json(item))
}
