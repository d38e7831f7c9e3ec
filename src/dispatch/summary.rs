//! Summary policies for turning an interaction trace into output text.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use super::executor::{CompletionClient, TraceEntry};
use crate::error::LlmError;

/// Marker the code-execution agent writes after a zero exit code.
const EXECUTION_SUCCEEDED: &str = "execution succeeded";

/// A fenced markdown code block, fences included.
const CODE_FENCE: &str = r"```[\s\S]*?```";

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are reviewing the transcript of a multi-agent system in which several \
agents collaborated on a task. Read the conversation and write the final \
answer to the task as if addressing the user directly. Include any code, \
numbers or file names the user needs. Do not mention the agents or the \
conversation itself.";

/// Pulls successfully executed code out of a trace.
pub trait CodeBlockExtractor: Send + Sync {
    fn extract(&self, trace: &[TraceEntry]) -> Vec<String>;
}

/// Collects the fenced code blocks of every assistant entry that is
/// immediately followed by a user entry reporting successful execution.
pub struct FencedCodeExtractor {
    fence: Regex,
}

impl FencedCodeExtractor {
    pub fn new() -> Self {
        Self {
            fence: Regex::new(CODE_FENCE).expect("code fence pattern is valid"),
        }
    }
}

impl Default for FencedCodeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBlockExtractor for FencedCodeExtractor {
    fn extract(&self, trace: &[TraceEntry]) -> Vec<String> {
        trace
            .windows(2)
            .filter(|pair| {
                pair[0].role == "assistant"
                    && pair[1].role == "user"
                    && pair[1].content.contains(EXECUTION_SUCCEEDED)
            })
            .flat_map(|pair| {
                self.fence
                    .find_iter(&pair[0].content)
                    .map(|m| m.as_str().to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Output for the `last` policy: the final entry's content, followed by the
/// extracted code blocks (blank-line separated) when there are any.
pub fn summarize_last(trace: &[TraceEntry], code_blocks: &[String]) -> String {
    let last = trace.last().map(|e| e.content.as_str()).unwrap_or_default();
    if code_blocks.is_empty() {
        last.to_string()
    } else {
        format!("{}\n{}", last, code_blocks.join("\n\n"))
    }
}

/// Produces a summary of a finished dialogue.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        task: &str,
        trace: &[TraceEntry],
        client: Arc<dyn CompletionClient>,
    ) -> Result<String, LlmError>;
}

/// Summarizer that asks the executor's completion client for a final answer.
pub struct LlmSummarizer;

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        task: &str,
        trace: &[TraceEntry],
        client: Arc<dyn CompletionClient>,
    ) -> Result<String, LlmError> {
        let history = serde_json::to_string(trace).map_err(|e| LlmError::InvalidResponse {
            provider: client.model_name().to_string(),
            reason: format!("could not encode conversation: {e}"),
        })?;
        let prompt = format!("Task: {task}. The conversation history is: {history}");

        tracing::debug!(model = %client.model_name(), entries = trace.len(), "Summarizing dialogue");
        client.complete(SUMMARY_SYSTEM_PROMPT, &prompt).await
    }
}
