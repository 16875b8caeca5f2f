use crate::AppState;
use axum::extract::State;
use axum::Json;
use joblib::TelemetrySnapshot;

/// One-off snapshot for clients that poll instead of subscribing over the socket.
pub async fn gpu_stats(State(state): State<AppState>) -> Json<TelemetrySnapshot> {
    Json(state.sampler.sample().await)
}
