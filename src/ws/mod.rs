pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Join code of the game topic to subscribe to on connect
    pub code: Option<String>,
    /// Returning player id; refreshes liveness on reconnect
    pub player: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request: code={:?}", params.code);

    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let welcome = ServerMessage::Welcome {
        protocol: "1.0".to_string(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if let Ok(msg) = serde_json::to_string(&welcome) {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            tracing::error!("Failed to send welcome message");
            return;
        }
    }

    // Subscribe immediately when the client reconnects with a known code,
    // and hand over the authoritative snapshot
    let mut topic_rx: Option<broadcast::Receiver<ServerMessage>> = None;
    if let Some(code) = &params.code {
        if let Some(game) = state.find_game_by_code(code).await {
            topic_rx = Some(state.subscribe(&game.id).await);

            // A returning player's heartbeat is refreshed before the sweep
            // can catch the reconnect gap; a removed player stays removed
            if let Some(player_id) = &params.player {
                if let Err(e) = state.heartbeat(player_id).await {
                    tracing::debug!("Reconnect heartbeat for {} refused: {}", player_id, e);
                }
            }

            if let Ok(snapshot) = state.full_state(code).await {
                if let Ok(json) = serde_json::to_string(&snapshot) {
                    let _ = sender.send(Message::Text(json.into())).await;
                }
            }
        }
    }

    loop {
        tokio::select! {
            // Game-topic broadcasts, once subscribed
            topic_msg = async {
                match &mut topic_rx {
                    Some(rx) => rx.recv().await.ok(),
                    // Not subscribed yet: wait forever
                    None => std::future::pending::<Option<ServerMessage>>().await,
                }
            } => {
                if let Some(msg) = topic_msg {
                    if let Ok(json) = serde_json::to_string(&msg) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            // Client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &state).await
                                {
                                    // Creating or joining a game moves this
                                    // socket onto that game's topic
                                    let subscribe_to = match &response {
                                        ServerMessage::GameCreated { game, .. } => Some(game.id.clone()),
                                        ServerMessage::Joined { game, .. } => Some(game.id.clone()),
                                        _ => None,
                                    };

                                    if let Ok(json) = serde_json::to_string(&response) {
                                        if sender.send(Message::Text(json.into())).await.is_err() {
                                            tracing::error!("Failed to send response");
                                            break;
                                        }
                                    }

                                    if let Some(game_id) = subscribe_to {
                                        topic_rx = Some(state.subscribe(&game_id).await);
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                };
                                if let Ok(json) = serde_json::to_string(&error) {
                                    let _ = sender.send(Message::Text(json.into())).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed");
}
