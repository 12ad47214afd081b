use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::accept_async;
use tungstenite::Message;
use tracing::{debug, info, warn};

use crate::state::SharedGameState;
use crate::vehicle::control::{DriverButtons, UserCommand};
use crate::vehicle::entity::EntityInput;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Input {
        #[serde(default)]
        buttons: DriverButtons,
        #[serde(default)]
        forward_move: f32,
        #[serde(default)]
        side_move: f32,
    },
    EntityInput {
        command: EntityInput,
    },
    /// Console `vehicle_flushscript`.
    Flushscript,
    Ping,
}

const PONG: &str = r#"{"type":"pong"}"#;

/// Apply one text frame from `player_id`. Returns a reply for the sender,
/// if the message calls for one. Malformed frames are logged and dropped.
pub async fn handle_message(
    state: &Mutex<SharedGameState>,
    player_id: &str,
    text: &str,
) -> Option<String> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(error) => {
            debug!(player = %player_id, %error, "ignoring malformed message");
            return None;
        }
    };

    match msg {
        ClientMessage::Ping => Some(PONG.to_string()),
        ClientMessage::Input {
            buttons,
            forward_move,
            side_move,
        } => {
            let cmd = UserCommand {
                buttons,
                forward_move,
                side_move,
            };
            state.lock().await.update_input(player_id, cmd);
            None
        }
        ClientMessage::EntityInput { command } => {
            state.lock().await.queue_entity_input(player_id, command);
            None
        }
        ClientMessage::Flushscript => {
            info!(player = %player_id, "script flush requested");
            state.lock().await.request_script_flush();
            None
        }
    }
}

pub async fn start_websocket_server(
    state: Arc<Mutex<SharedGameState>>,
    addr: String,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "websocket listening");

    loop {
        let (raw, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(error) => {
                warn!(%error, "accept failed");
                continue;
            }
        };
        let state_clone = Arc::clone(&state);

        tokio::spawn(async move {
            let ws = match accept_async(raw).await {
                Ok(ws) => ws,
                Err(error) => {
                    warn!(%peer, %error, "websocket handshake failed");
                    return;
                }
            };
            let (mut write, mut read) = ws.split();

            // -------------------------------
            // 1) Outgoing channel + send loop
            // -------------------------------
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if write.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
            });

            // -------------------------------
            // 2) Register; the tick loop builds the vehicle
            // -------------------------------
            let player_id = uuid::Uuid::new_v4().to_string();
            state_clone.lock().await.register_client(&player_id, tx.clone());
            info!(player = %player_id, %peer, "player connected");

            let welcome = serde_json::json!({ "type": "welcome", "player_id": player_id });
            let _ = tx.send(welcome.to_string());

            // -------------------------------
            // 3) Receive loop
            // -------------------------------
            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };
                if msg.is_close() {
                    break;
                }
                if !msg.is_text() {
                    continue;
                }
                let Ok(text) = msg.to_text() else {
                    continue;
                };

                if let Some(reply) = handle_message(&state_clone, &player_id, text).await {
                    let _ = tx.send(reply);
                }
            }

            info!(player = %player_id, "player disconnected");
            state_clone.lock().await.remove_client(&player_id);
        });
    }
}
