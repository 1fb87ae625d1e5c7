use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use mqscope_api::MessageRecord;
use mqscope_engine::NodeSnapshot;

use super::AppState;

// ═══════════════════════════════════════════════════════════════
//  WebSocket: /ws
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(socket, state))
}

// ═══════════════════════════════════════════════════════════════
//  Protocol types
// ═══════════════════════════════════════════════════════════════

/// Client request. Store events are pushed without asking.
#[derive(Deserialize)]
struct WsAction {
    action: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    history: Option<usize>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsReply<'a> {
    Snapshot {
        topic: &'a str,
        records: Vec<&'a MessageRecord>,
    },
    Tree {
        nodes: Vec<NodeSnapshot>,
    },
    /// The connection fell behind and missed `skipped` events.
    Lagged {
        skipped: u64,
    },
    Error {
        error: String,
    },
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode ws message");
            true
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Connection handler
// ═══════════════════════════════════════════════════════════════

async fn ws_connection(mut socket: WebSocket, state: AppState) {
    let mut events = state.store.subscribe();

    loop {
        tokio::select! {
            biased;

            _ = state.shutdown.cancelled() => break,

            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };

                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let action: WsAction = match serde_json::from_str(&text) {
                    Ok(a) => a,
                    Err(e) => {
                        let reply = WsReply::Error { error: format!("parse: {e}") };
                        if !send_json(&mut socket, &reply).await {
                            break;
                        }
                        continue;
                    }
                };

                if !handle_action(&state, &mut socket, &action).await {
                    break;
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send_json(&mut socket, &event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "ws client lagging behind store events");
                        if !send_json(&mut socket, &WsReply::Lagged { skipped }).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Returns `false` once the socket is gone.
async fn handle_action(state: &AppState, socket: &mut WebSocket, action: &WsAction) -> bool {
    match action.action.as_str() {
        "snapshot" => {
            let messages = state.store.messages(&action.topic);
            let skip = action
                .history
                .map(|n| messages.len().saturating_sub(n))
                .unwrap_or(0);
            let reply = WsReply::Snapshot {
                topic: &action.topic,
                records: messages.iter().skip(skip).collect(),
            };
            send_json(socket, &reply).await
        }
        "tree" => {
            let reply = WsReply::Tree {
                nodes: state.store.tree_snapshot(true),
            };
            send_json(socket, &reply).await
        }
        _ => {
            let reply = WsReply::Error {
                error: "unknown action".into(),
            };
            send_json(socket, &reply).await
        }
    }
}
