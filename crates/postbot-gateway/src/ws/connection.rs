use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use postbot_store::StoreChange;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::app::AppState;

const CHANGE_EVENT: &str = "posts.changed";

/// Axum handler: upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_connection(socket, state))
}

/// Per-connection loop: forwards store changes until the client leaves.
/// Client text frames are ignored; the feed is one-way.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "new WS connection");

    let (mut tx, mut rx) = socket.split();
    let mut changes = state.sync.subscribe();
    state.ws_clients.insert(conn_id.clone(), chrono::Utc::now());

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }

            change = changes.recv() => {
                let payload = match change {
                    Ok(change) => change_event(Some(&change)),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(conn_id, missed, "WS client lagged, sending full refresh hint");
                        change_event(None)
                    }
                    Err(RecvError::Closed) => break,
                };
                if tx.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.ws_clients.remove(&conn_id);
    info!(conn_id, "WS connection closed");
}

/// Event frame for one change. `None` means "something changed, re-read
/// everything" and carries no key.
pub fn change_event(change: Option<&StoreChange>) -> String {
    let event = match change {
        Some(c) => serde_json::json!({
            "event": CHANGE_EVENT,
            "medium": c.medium,
            "post_id": c.post_id,
        }),
        None => serde_json::json!({ "event": CHANGE_EVENT }),
    };
    event.to_string()
}
