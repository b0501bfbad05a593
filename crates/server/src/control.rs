//! Control channel and hook endpoints.
//!
//! Each WebSocket connection is one client of the worker. Commands arrive as
//! JSON text frames; events and replies go back the same way.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};

use harbor_core::ControlCommand;
use harbor_worker::Worker;

use crate::app::AppState;
use crate::error::ProxyError;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_client(socket, state.worker))
}

async fn serve_client(socket: WebSocket, worker: Arc<Worker>) {
    let (id, mut events) = worker.clients().connect().await;
    let (mut sink, mut stream) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("failed to encode {:?}: {}", event, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ControlCommand>(text.as_str()) {
            Ok(command) => {
                if let Err(e) = worker.handle_message(id, command).await {
                    tracing::warn!("{} command failed: {}", id, e);
                }
            }
            Err(e) => tracing::warn!("{} sent an unrecognized message: {}", id, e),
        }
    }

    worker.clients().disconnect(id).await;
    forward.abort();
}

pub async fn push(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ProxyError> {
    let payload = (!body.is_empty()).then(|| String::from_utf8_lossy(&body).into_owned());
    state.worker.push(payload).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn sync(State(state): State<AppState>, Path(tag): Path<String>) -> Result<StatusCode, ProxyError> {
    state.worker.sync(tag).await?;
    Ok(StatusCode::ACCEPTED)
}
