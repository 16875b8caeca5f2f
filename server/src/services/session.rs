use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use joblib::types::SessionId;
use joblib::{Event, EventName};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A client event: `{"event": "...", "payload": ...}`.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Default, Deserialize)]
struct StartProcessPayload {
    #[serde(alias = "uuid")]
    id: Option<String>,
    filename: Option<String>,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session_id, outbox) = state.hub.register_session().await;
    let (mut sender, mut receiver) = socket.split();

    // the outbox is unbounded, so a slow client only delays its own writer
    let writer = tokio::spawn(async move {
        let mut outbox = UnboundedReceiverStream::new(outbox);
        while let Some(event) = outbox.next().await {
            if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => handle_client_message(&state, session_id, text.as_str()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.end_session(session_id);
    writer.abort();
}

/// Act on one client event. Failures are reported to the session as `error` events, never returned.
pub async fn handle_client_message(state: &AppState, session_id: SessionId, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => {
            state
                .hub
                .emit(session_id, Event::error("Error: Invalid message."));
            return;
        }
    };
    match message.event.as_str() {
        "start_process" => start_process(state, session_id, message.payload).await,
        "start_gpu_stats" => state.hub.start_telemetry(session_id),
        "stop_gpu_stats" => state.hub.stop_telemetry(session_id),
        "request_uploads_list" => match state.store.list().await {
            Ok(uploads) => state.hub.emit(
                session_id,
                Event::new(EventName::UploadsList, json!({ "uploads": uploads })),
            ),
            Err(err) => state
                .hub
                .emit(session_id, Event::error(format!("Error: {}", err))),
        },
        other => tracing::debug!(session = %session_id, event = other, "ignoring unknown client event"),
    }
}

async fn start_process(state: &AppState, session_id: SessionId, payload: Value) {
    let request: StartProcessPayload = serde_json::from_value(payload).unwrap_or_default();
    let present = |field: Option<String>| field.filter(|value| !value.is_empty());
    let (Some(id), Some(filename)) = (present(request.id), present(request.filename)) else {
        state
            .hub
            .emit(session_id, Event::error("Error: Missing id or filename."));
        return;
    };

    let path = match state.store.resolve(&id, &filename).await {
        Ok(path) => path,
        Err(_) => {
            state.hub.emit(
                session_id,
                Event::error(format!("Error: File not found ({}/{}).", id, filename)),
            );
            return;
        }
    };

    match state.runner.start(&path) {
        Ok(job) => state.hub.start_job_forwarding(session_id, job),
        Err(err) => {
            tracing::warn!(session = %session_id, error = %err, "job launch failed");
            state
                .hub
                .emit(session_id, Event::error(format!("Error: {}", err)));
        }
    }
}
