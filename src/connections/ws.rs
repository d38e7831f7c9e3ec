//! WebSocket server + REST endpoints for the hub.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::transport::WsTransport;
use crate::dispatch::{ChatRequest, TaskDispatcher, user_dir};
use crate::messages::{ClientMessage, Payload, SocketMessage, UserMessage};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct HubState {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<TaskDispatcher>,
    /// Root for per-user scratch directories.
    pub files_root: PathBuf,
    /// Cancelled on shutdown; in-flight dispatches get a child token.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with the hub WebSocket and REST routes.
pub fn hub_routes(state: HubState) -> Router {
    Router::new()
        .route("/ws/{client_id}", get(ws_handler))
        .route("/health", get(health))
        .route("/api/connections", get(list_connections))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "agent-hub"
    }))
}

async fn list_connections(State(state): State<HubState>) -> impl IntoResponse {
    let clients = state.registry.client_ids().await;
    Json(serde_json::json!({
        "total": clients.len(),
        "clients": clients,
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<HubState>,
) -> impl IntoResponse {
    info!(client_id = %client_id, "WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: HubState) {
    let (sink, mut stream) = socket.split();
    let transport = WsTransport::new(sink);
    let open = transport.open_flag();

    let handle = match state.registry.connect(Box::new(transport), &client_id).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&text, &client_id, &handle, &state);
            }
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "WebSocket client disconnected");
                break;
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    open.store(false, Ordering::Release);
    state.registry.disconnect(&handle).await;
    debug!(client_id = %client_id, "WebSocket connection closed");
}

fn handle_client_message(text: &str, client_id: &str, handle: &ConnectionHandle, state: &HubState) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::UserMessage(body)) => {
            let client_id = client_id.to_string();
            let handle = Arc::clone(handle);
            let state = state.clone();
            // Dispatch off the read loop so the socket keeps draining while the task runs.
            tokio::spawn(async move {
                match process_user_message(*body, &client_id, &state).await {
                    Ok(reply) => {
                        state.registry.send(&reply, &handle).await;
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Failed to encode agent response");
                    }
                }
            });
        }
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
        }
    }
}

/// Run one `user_message` and build the `agent_response` frame for it.
async fn process_user_message(
    body: UserMessage,
    client_id: &str,
    state: &HubState,
) -> Result<Payload, serde_json::Error> {
    let UserMessage {
        message,
        workflow,
        history,
    } = body;

    let connection_id = message
        .connection_id
        .clone()
        .unwrap_or_else(|| client_id.to_string());
    let request = ChatRequest {
        user_dir: user_dir(&state.files_root, message.user_id.as_deref()),
        message,
        history,
        workflow,
        connection_id: Some(connection_id),
    };

    let data = match state
        .dispatcher
        .chat(request, state.shutdown.child_token())
        .await
    {
        Ok(response) => serde_json::json!({
            "status": true,
            "message": "Message processed successfully",
            "data": serde_json::to_value(response)?,
        }),
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "Failed to process user message");
            serde_json::json!({
                "status": false,
                "message": format!("Error occurred while processing message: {e}"),
            })
        }
    };

    serde_json::to_value(SocketMessage::agent_response(client_id, data))
}
