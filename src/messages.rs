//! Wire data model: payloads, socket messages and chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::Workflow;

/// A structured, serializable message body.
pub type Payload = serde_json::Value;

/// Key under which broadcast payloads are wrapped.
pub const BROADCAST_KEY: &str = "message";

/// Wrap a payload in the broadcast envelope: `{ "message": <payload> }`.
pub fn broadcast_envelope(payload: &Payload) -> Payload {
    let mut envelope = serde_json::Map::new();
    envelope.insert(BROADCAST_KEY.to_string(), payload.clone());
    Payload::Object(envelope)
}

/// Discriminator for server → client socket messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketMessageKind {
    /// Status notice (e.g. "summarizing").
    AgentStatus,
    /// One step of agent dialogue, emitted while a task runs.
    AgentMessage,
    /// Final reply to a `user_message`.
    AgentResponse,
}

/// A message pushed to a client over its socket.
///
/// `connection_id` correlates the message with the client that started the
/// work; the message pump uses it to pick recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketMessage {
    #[serde(rename = "type")]
    pub kind: SocketMessageKind,
    pub data: Payload,
    pub connection_id: Option<String>,
}

impl SocketMessage {
    /// Build a status notice with `{status, message}` data.
    pub fn status(
        connection_id: Option<&str>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: SocketMessageKind::AgentStatus,
            data: serde_json::json!({
                "status": status.into(),
                "message": message.into(),
            }),
            connection_id: connection_id.map(str::to_string),
        }
    }

    /// Build a progress notice carrying arbitrary data.
    pub fn agent_message(connection_id: Option<&str>, data: Payload) -> Self {
        Self {
            kind: SocketMessageKind::AgentMessage,
            data,
            connection_id: connection_id.map(str::to_string),
        }
    }

    /// Build the reply to a `user_message`.
    pub fn agent_response(connection_id: &str, data: Payload) -> Self {
        Self {
            kind: SocketMessageKind::AgentResponse,
            data,
            connection_id: Some(connection_id.to_string()),
        }
    }
}

fn default_role() -> String {
    "user".to_string()
}

fn empty_meta() -> Payload {
    Payload::Object(serde_json::Map::new())
}

/// A chat message: an inbound request or the response produced for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default = "empty_meta")]
    pub meta: Payload,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message with the given role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: None,
            role: role.into(),
            content: content.into(),
            session_id: None,
            connection_id: None,
            meta: empty_meta(),
            created_at: Utc::now(),
        }
    }

    /// Create a user-authored message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_meta(mut self, meta: Payload) -> Self {
        self.meta = meta;
        self
    }
}

/// Body of a `user_message` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    #[serde(default)]
    pub workflow: Option<Workflow>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

/// Message from client → server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "user_message")]
    UserMessage(Box<UserMessage>),
}
