//! WebSocket endpoint for polling clients

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::api::ApiState;

#[derive(Debug, Deserialize)]
struct WsRequest {
    command: String,
}

/// GET /ws - upgrade to a WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ApiState>) {
    tracing::info!("WebSocket client connected");

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("WebSocket receive error: {}", e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let reply = handle_command(&state, text.as_str()).await;
                if socket
                    .send(Message::Text(reply.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::info!("WebSocket client disconnected");
}

/// Answer one text frame
async fn handle_command(state: &ApiState, text: &str) -> Value {
    let request: WsRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return json!({"type": "error", "message": format!("Invalid request: {}", e)})
        }
    };

    match request.command.as_str() {
        "list_sessions" => {
            let sessions = state.registry.list().await;
            json!({"type": "sessions", "data": sessions})
        }
        "check_prompts" => {
            let prompts = state.scanner.scan_all(&state.registry).await;
            json!({"type": "prompts", "data": prompts})
        }
        other => json!({"type": "error", "message": format!("Unknown command: {}", other)}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claude_remote_core::process::mock::MockSpawner;
    use claude_remote_core::{SessionRegistry, SessionSettings};

    async fn state_with_prompt() -> (ApiState, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = SessionSettings {
            init_window_ms: 0,
            ..Default::default()
        };
        let spawner = MockSpawner::new();
        let registry = Arc::new(SessionRegistry::new(settings, Arc::new(spawner.clone())).unwrap());
        let id = registry.create(Some("ws"), Some(dir.path())).await.unwrap();
        spawner.control(&id).unwrap().emit("Proceed? (y/n)");
        (ApiState::new(registry), id, dir)
    }

    #[tokio::test]
    async fn test_list_sessions_command() {
        let (state, id, _dir) = state_with_prompt().await;
        let reply = handle_command(&state, r#"{"command":"list_sessions"}"#).await;
        assert_eq!(reply["type"], "sessions");
        assert_eq!(reply["data"][0]["session_id"], id.as_str());
    }

    #[tokio::test]
    async fn test_check_prompts_command() {
        let (state, id, _dir) = state_with_prompt().await;
        let reply = handle_command(&state, r#"{"command":"check_prompts"}"#).await;
        assert_eq!(reply["type"], "prompts");
        assert_eq!(reply["data"][0]["session_id"], id.as_str());
        assert_eq!(reply["data"][0]["prompt_text"], "Proceed? (y/n)");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (state, _id, _dir) = state_with_prompt().await;
        let reply = handle_command(&state, r#"{"command":"reboot"}"#).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "Unknown command: reboot");
    }

    #[tokio::test]
    async fn test_malformed_frame() {
        let (state, _id, _dir) = state_with_prompt().await;
        let reply = handle_command(&state, "not json").await;
        assert_eq!(reply["type"], "error");
        assert!(reply["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request"));
    }
}
