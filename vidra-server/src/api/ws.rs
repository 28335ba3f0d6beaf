//! Browser-facing progress WebSocket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::debug;
use uuid::Uuid;
use vidra_model::VideoId;

use crate::state::AppState;

pub async fn progress_socket(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let video_id = VideoId(video_id);
    upgrade.on_upgrade(move |socket| handle_socket(state, video_id, socket))
}

async fn handle_socket(state: AppState, video_id: VideoId, mut socket: WebSocket) {
    let (conn_id, mut events) = state.connections.join(video_id);
    debug!("WebSocket {conn_id} watching {video_id}");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Clients only listen; anything but a close is ignored.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.connections.leave(conn_id);
    debug!("WebSocket {conn_id} closed");
}
