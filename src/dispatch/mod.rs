//! Task dispatch: workflow execution, summary policies and scratch directories.

pub mod dispatcher;
pub mod executor;
pub mod files;
pub mod summary;
pub mod workflow;

pub use dispatcher::{ChatRequest, TaskDispatcher};
pub use executor::{CompletionClient, ExecutionRequest, LoopbackExecutor, TaskExecutor, TraceEntry};
pub use files::{ChangeTracker, FileDescriptor, ModifiedFiles, user_dir};
pub use summary::{CodeBlockExtractor, FencedCodeExtractor, LlmSummarizer, Summarizer};
pub use workflow::{SummaryMethod, Workflow, WorkflowType};
