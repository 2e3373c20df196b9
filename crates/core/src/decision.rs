//! DecisionService trait: the abstraction over the model that picks actions.
//!
//! A decision service sees the running context, a compact catalog of the
//! available tools, and optionally retrieved memory, and answers with exactly
//! one [`Decision`]. It never invokes tools itself.
//!
//! Implementations: a remote HTTP service, scripted mocks in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DecisionError;
use crate::memory::MemoryQueryResult;
use crate::session::{AgentContext, SessionId};
use crate::tool::ToolDescriptor;

/// A tool as presented to the decision service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    /// The tool name
    pub name: String,

    /// One-line description
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub input_schema: serde_json::Value,
}

impl From<&ToolDescriptor> for ToolSummary {
    fn from(d: &ToolDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            description: d.summary_line().to_string(),
            input_schema: d.input_schema.clone(),
        }
    }
}

/// LLM-consumable summary of the full catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSummary {
    /// Tools sorted by name
    pub tools: Vec<ToolSummary>,

    /// Usage notes from tool hosts, keyed by transport name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<(String, String)>,
}

impl CatalogSummary {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Compact text form: one line per tool plus its schema.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for tool in &self.tools {
            out.push_str(&format!(
                "- {}: {}\n  schema: {}\n",
                tool.name, tool.description, tool.input_schema
            ));
        }
        for (transport, text) in &self.instructions {
            out.push_str(&format!("[{transport}] {text}\n"));
        }
        out
    }
}

/// Everything a decision service gets for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub session_id: SessionId,
    pub query: String,
    pub context: AgentContext,
    pub catalog: CatalogSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryQueryResult>,
    /// Steps still available before the step limit
    pub remaining_steps: u32,
}

/// The next action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    ToolCall {
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    FinalAnswer { answer: String },
}

impl Decision {
    pub fn call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Decision::ToolCall {
            name: name.into(),
            arguments,
            rationale: None,
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Decision::FinalAnswer {
            answer: text.into(),
        }
    }
}

/// The core DecisionService trait.
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// A human-readable name for this service.
    fn name(&self) -> &str;

    /// Produce the next action for the given request.
    async fn decide(
        &self,
        request: &DecisionRequest,
    ) -> std::result::Result<Decision, DecisionError>;
}
