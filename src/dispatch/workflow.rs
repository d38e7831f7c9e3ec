//! Workflow configuration supplied with each chat request.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How final output text is derived from an interaction trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    /// Last trace entry plus any successfully executed code blocks.
    #[default]
    Last,
    /// Ask a language model to summarize the dialogue.
    Llm,
    /// No output text.
    None,
}

impl std::fmt::Display for SummaryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Last => write!(f, "last"),
            Self::Llm => write!(f, "llm"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for SummaryMethod {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last" => Ok(Self::Last),
            "llm" => Ok(Self::Llm),
            "none" => Ok(Self::None),
            _ => Err(ConfigError::InvalidValue {
                key: "summary_method".to_string(),
                message: format!("unknown summary method: {s}"),
            }),
        }
    }
}

/// Shape of the agent team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowType {
    #[default]
    TwoAgents,
    GroupChat,
}

/// A workflow specification. Agent definitions are opaque to the hub and
/// passed through to the task executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub summary_method: SummaryMethod,
    #[serde(default)]
    pub agents: serde_json::Value,
}

impl Workflow {
    pub fn new(name: impl Into<String>, summary_method: SummaryMethod) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            workflow_type: WorkflowType::default(),
            summary_method,
            agents: serde_json::Value::Null,
        }
    }
}
