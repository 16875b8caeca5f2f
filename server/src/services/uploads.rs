use super::assets::file_response;
use super::error::ApiError;
use crate::AppState;
use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::Json;
use joblib::types::ArtifactId;
use joblib::UploadsEntry;
use serde::Serialize;
use serde_json::{json, Value};

const UPLOAD_FIELD: &str = "lasfile";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub id: ArtifactId,
    /// Same as `id`, for clients that read the older field name.
    pub uuid: ArtifactId,
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct UploadsListing {
    pub uploads: Vec<UploadsEntry>,
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ApiError::bad_request("No file selected"));
        }
        let artifact = state.store.create_streamed(&filename, field).await?;
        return Ok(Json(UploadResponse {
            success: true,
            id: artifact.id,
            uuid: artifact.id,
            filename: artifact.filename,
        }));
    }
    Err(ApiError::bad_request("No file part"))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<UploadsListing>, ApiError> {
    let uploads = state.store.list().await?;
    Ok(Json(UploadsListing { uploads }))
}

pub async fn download(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    file_response(state.store.root(), &path).await
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}
