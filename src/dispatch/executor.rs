//! Task executor boundary, the component that runs the agent dialogue.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::workflow::Workflow;
use crate::connections::MessageSink;
use crate::error::{ExecutorError, LlmError};
use crate::messages::{ChatMessage, SocketMessage};

/// One step of an interaction trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TraceEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: String::new(),
            recipient: String::new(),
            role: role.into(),
            content: content.into(),
            timestamp: None,
        }
    }

    /// Set sender/recipient and stamp the entry with the current time.
    pub fn between(mut self, sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        self.sender = sender.into();
        self.recipient = recipient.into();
        self.timestamp = Some(Utc::now());
        self
    }
}

/// Everything an executor needs to run one task.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Trimmed message text.
    pub task: String,
    pub history: Vec<ChatMessage>,
    /// Fresh scratch directory for this run.
    pub work_dir: PathBuf,
    pub workflow: Workflow,
    /// Client id the progress notices should be routed to.
    pub connection_id: Option<String>,
}

/// Opaque completion client exposed by an executor for summarization.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run a single system + user prompt completion and return the text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

/// Runs a workflow against one message and returns the full interaction trace.
///
/// Implementations may push progress notices through `sink` at any time
/// while running; enqueueing never blocks.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest,
        sink: MessageSink,
        cancel: CancellationToken,
    ) -> Result<Vec<TraceEntry>, ExecutorError>;

    /// Client the `llm` summary method should use.
    fn client(&self) -> Option<Arc<dyn CompletionClient>> {
        None
    }
}

/// Executor that answers every task by echoing it back.
///
/// Used by the binary to exercise the full connect → dispatch → reply path
/// without a model behind it.
pub struct LoopbackExecutor;

#[async_trait]
impl TaskExecutor for LoopbackExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        sink: MessageSink,
        cancel: CancellationToken,
    ) -> Result<Vec<TraceEntry>, ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let trace = vec![
            TraceEntry::new("user", request.task.clone()).between("user_proxy", "assistant"),
            TraceEntry::new("assistant", request.task).between("assistant", "user_proxy"),
        ];

        let connection_id = request.connection_id.as_deref();
        for entry in &trace {
            match serde_json::to_value(entry) {
                Ok(data) => sink.send(&SocketMessage::agent_message(connection_id, data)),
                Err(e) => tracing::warn!(error = %e, "Failed to encode trace entry"),
            }
        }

        Ok(trace)
    }
}
