pub mod assets;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod uploads;

use crate::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(assets::index))
        .route("/modules/{*path}", get(assets::module))
        .route("/upload", post(uploads::upload))
        .route("/list_uploads", get(uploads::list))
        .route("/uploads/{*path}", get(uploads::download))
        .route("/delete/{id}", post(uploads::delete).delete(uploads::delete))
        .route("/gpu_stats", get(telemetry::gpu_stats))
        .route("/ws", get(session::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
