//! Error types for the agent hub.

/// Top-level error type for the hub binary: startup configuration and
/// listener I/O. Per-request failures are reported to the client instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Workflow must be specified")]
    MissingWorkflow,

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Faults raised by a connection's transport.
///
/// These never escape the registry: a failed send deregisters the
/// connection and is reported as a [`Delivery`](crate::connections::Delivery).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection already closed")]
    Closed,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Working directory and file-scan errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a task executor. Propagated to the dispatcher's caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Task execution failed: {reason}")]
    Failed { reason: String },

    #[error("Task execution cancelled")]
    Cancelled,
}

/// Completion client errors (used by the summarizer).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Errors from processing a single chat request.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Summary method 'llm' requires a completion client, but the executor exposes none")]
    MissingClient,

    #[error("Summarization failed: {0}")]
    Summarizer(#[from] LlmError),

    #[error("Failed to encode response metadata: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the hub.
pub type Result<T> = std::result::Result<T, Error>;
