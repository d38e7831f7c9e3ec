//! Task dispatcher. Runs one chat request through the task executor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::executor::{ExecutionRequest, TaskExecutor, TraceEntry};
use super::files::{ChangeTracker, FileDescriptor, ModifiedFiles, work_dir};
use super::summary::{
    CodeBlockExtractor, FencedCodeExtractor, LlmSummarizer, Summarizer, summarize_last,
};
use super::workflow::{SummaryMethod, Workflow};
use crate::connections::MessageSink;
use crate::error::{ConfigError, DispatchError, WorkspaceError};
use crate::messages::{ChatMessage, SocketMessage};

/// One inbound request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: ChatMessage,
    pub history: Vec<ChatMessage>,
    pub workflow: Option<Workflow>,
    /// Client id progress notices are routed to.
    pub connection_id: Option<String>,
    /// Per-user directory the run's scratch directory is created under.
    pub user_dir: PathBuf,
}

/// Metadata attached to every response.
#[derive(Debug, Serialize)]
struct ResponseMeta {
    messages: Vec<TraceEntry>,
    summary_method: SummaryMethod,
    /// Wall-clock seconds spent in the executor.
    time: f64,
    files: Vec<FileDescriptor>,
}

/// Turns chat requests into assistant responses.
pub struct TaskDispatcher {
    executor: Arc<dyn TaskExecutor>,
    sink: MessageSink,
    summarizer: Arc<dyn Summarizer>,
    extractor: Arc<dyn CodeBlockExtractor>,
    changes: Arc<dyn ChangeTracker>,
}

impl TaskDispatcher {
    /// Create a dispatcher with the default summarizer, code extractor and
    /// file tracker. Changed-file paths are reported relative to `files_root`.
    pub fn new(executor: Arc<dyn TaskExecutor>, sink: MessageSink, files_root: PathBuf) -> Self {
        Self {
            executor,
            sink,
            summarizer: Arc::new(LlmSummarizer),
            extractor: Arc::new(FencedCodeExtractor::new()),
            changes: Arc::new(ModifiedFiles::new(files_root)),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn CodeBlockExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_change_tracker(mut self, changes: Arc<dyn ChangeTracker>) -> Self {
        self.changes = changes;
        self
    }

    /// Process one message and produce the assistant's response.
    ///
    /// Fails before touching the filesystem or the executor when no workflow
    /// is supplied. Executor errors are returned unchanged.
    pub async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatMessage, DispatchError> {
        let ChatRequest {
            message,
            history,
            workflow,
            connection_id,
            user_dir,
        } = request;

        let workflow = workflow.ok_or(ConfigError::MissingWorkflow)?;
        let summary_method = workflow.summary_method;

        let work_dir = work_dir(&user_dir, message.session_id.as_deref(), Utc::now());
        fs::create_dir_all(&work_dir)
            .await
            .map_err(WorkspaceError::from)?;

        let task = message.content.trim().to_string();
        info!(
            workflow = %workflow.name,
            session_id = ?message.session_id,
            connection_id = ?connection_id,
            work_dir = %work_dir.display(),
            "Running workflow"
        );

        let started_at = SystemTime::now();
        let clock = Instant::now();
        let trace = self
            .executor
            .execute(
                ExecutionRequest {
                    task: task.clone(),
                    history,
                    work_dir: work_dir.clone(),
                    workflow,
                    connection_id: connection_id.clone(),
                },
                self.sink.clone(),
                cancel,
            )
            .await?;
        let elapsed = clock.elapsed();
        let finished_at = SystemTime::now();

        let files = self
            .changes
            .list_changed(started_at, finished_at, &work_dir)
            .await?;

        let output = self
            .generate_output(&task, &trace, summary_method, connection_id.as_deref())
            .await?;

        debug!(
            entries = trace.len(),
            files = files.len(),
            elapsed_secs = elapsed.as_secs_f64(),
            "Workflow finished"
        );

        let meta = ResponseMeta {
            messages: trace,
            summary_method,
            time: elapsed.as_secs_f64(),
            files,
        };

        let mut response = ChatMessage::new("assistant", output).with_meta(serde_json::to_value(&meta)?);
        response.user_id = message.user_id;
        response.session_id = message.session_id;
        response.connection_id = connection_id;
        Ok(response)
    }

    async fn generate_output(
        &self,
        task: &str,
        trace: &[TraceEntry],
        method: SummaryMethod,
        connection_id: Option<&str>,
    ) -> Result<String, DispatchError> {
        match method {
            SummaryMethod::Last => {
                let code_blocks = self.extractor.extract(trace);
                Ok(summarize_last(trace, &code_blocks))
            }
            SummaryMethod::Llm => {
                let client = self.executor.client().ok_or(DispatchError::MissingClient)?;
                self.sink.send(&SocketMessage::status(
                    connection_id,
                    "summarizing",
                    "Summarizing agent dialogue",
                ));
                Ok(self.summarizer.summarize(task, trace, client).await?)
            }
            SummaryMethod::None => Ok(String::new()),
        }
    }
}
