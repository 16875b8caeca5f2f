use super::error::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use joblib::error::Error;
use joblib::store::contained_file;

pub async fn index(State(state): State<AppState>) -> Result<Response, ApiError> {
    file_response(&state.static_dir, "index.html").await
}

pub async fn module(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    file_response(&state.static_dir.join("modules"), &path).await
}

/// Serve `relative` from under `base`. Escapes are 403, missing files 404.
pub async fn file_response(base: &std::path::Path, relative: &str) -> Result<Response, ApiError> {
    let path = contained_file(base, relative).await?;
    let contents = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::from(Error::NotFound))?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], contents).into_response())
}
